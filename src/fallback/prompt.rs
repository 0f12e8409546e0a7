//! Generation requests
use std::path::Path;

use crate::{fallback::sample::Sample, input::FormatKind, record::FieldContract};

/// Transformation to generate
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Task {
    /// Raw input to canonical records
    Canonical { format: FormatKind },

    /// Canonical records to location records
    Location,
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Canonical { format } => write!(f, "{} to canonical conversion", format),
            Self::Location => write!(f, "location extraction"),
        }
    }
}

const LANGUAGE: &str = r#"You write transformation programs in a small declarative JSON language.
A program reads the input file line by line and emits one JSON record per matching line:

{
  "source": "lines" | "jsonl",
  "skip": ["<regex of lines to ignore>"],
  "rules": [
    {
      "match": "<regex selecting lines; named groups (?P<name>..) may be referenced>",
      "split": "<optional delimiter; tokens are then referenced by 0-based index>",
      "fields": {
        "<output field>": { "from": <index or name>, "as": "<binding>", "hemisphere": <index or name>, "week": <index or name>, "scale": <number> },
        "<output field>": { "value": <JSON constant> }
      }
    }
  ]
}

With "source": "jsonl" every line is a JSON object and "from" names one of its keys.
The first rule matching a line produces its record; other lines are ignored.
Bindings ("as"):
- auto: integer, float or text, whichever parses first (default)
- text, int, float
- nmea_latitude / nmea_longitude: (d)ddmm.mmmm, "hemisphere" references the N/S/E/W letter
- unix_seconds / unix_millis: converted to integer milliseconds
- iso8601: datetime text, converted to integer milliseconds
- gps_week_tow: seconds of week, "week" references the GPS week number; converted to integer milliseconds
"scale" multiplies the parsed number before conversion.
Nothing else is available. Answer with the program only, in a single ```json fenced block."#;

/// System role context
pub fn system(task: &Task) -> String {
    let role = match task {
        Task::Canonical { format } => format!(
            "You convert {} GNSS receiver files to canonical records: one flat JSON object per observation or fix, always carrying timestamp_ms (UNIX milliseconds, UTC).",
            match format {
                FormatKind::Unknown => "unrecognized".to_string(),
                other => other.to_string(),
            }
        ),
        Task::Location => "You extract location records from canonical GNSS records (one JSON object per line). Decimal degrees, meters and meters per second are expected.".to_string(),
    };

    format!("{}\n\n{}", role, LANGUAGE)
}

/// Initial request
pub fn request(
    task: &Task,
    contract: &FieldContract,
    sample: &Sample,
    input: &Path,
    output: &Path,
) -> String {
    format!(
        "Task: {}.\nInput file: {}\nOutput file: {}\n\n{} contract.\n{}\nInput sample ({} lines, {} message types):\n{}",
        task,
        input.display(),
        output.display(),
        contract.name(),
        contract.describe(),
        sample.len(),
        sample.types(),
        sample,
    )
}

/// Feedback on a failed attempt
pub fn feedback(error: &str, trace: &[String]) -> String {
    let mut content = format!("Your program failed: {}\n", error);

    if !trace.is_empty() {
        content.push_str("Execution trace:\n");
        for line in trace {
            content.push_str(line);
            content.push('\n');
        }
    }

    content.push_str("Fix the program and answer with the complete program in a single ```json block.");
    content
}

/// Extracts the program from a reply: first fenced block, or
/// the outermost JSON object when fences are missing.
pub fn extract_program(reply: &str) -> Option<&str> {
    if let Some(start) = reply.find("```") {
        let block = &reply[start + 3..];
        // info string
        let block = match block.find('\n') {
            Some(eol) => &block[eol + 1..],
            None => block,
        };
        let end = block.find("```").unwrap_or(block.len());
        let program = block[..end].trim();
        if !program.is_empty() {
            return Some(program);
        }
    }

    let start = reply.find('{')?;
    let end = reply.rfind('}')?;

    if end > start {
        Some(&reply[start..=end])
    } else {
        None
    }
}
