//! Representative input samples
use std::collections::HashSet;

use crate::settings::FallbackSettings;

/// Lines are truncated past this many characters
const MAX_LINE_CHARS: usize = 256;

/// Message type of a line, used to favor diversity:
/// NMEA address, JSON `sentence_type`, or first token.
fn line_type(line: &str) -> String {
    let line = line.trim();

    if let Some(body) = line.strip_prefix('$') {
        return body.split(',').next().unwrap_or_default().to_string();
    }

    if line.starts_with('{') {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(line) {
            return match map.get("sentence_type").and_then(|v| v.as_str()) {
                Some(sentence_type) => sentence_type.to_string(),
                None => format!("json:{}", map.len()),
            };
        }
    }

    let first = line
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .next()
        .unwrap_or_default();

    if first.parse::<f64>().is_ok() {
        let n = line
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .count();
        format!("fields:{}", n)
    } else {
        first.to_string()
    }
}

fn truncate(line: &str) -> String {
    match line.char_indices().nth(MAX_LINE_CHARS) {
        Some((offset, _)) => format!("{}..", &line[..offset]),
        None => line.to_string(),
    }
}

/// Bounded size excerpt of an input
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    lines: Vec<String>,
    types: usize,
}

impl Sample {
    /// Builds a [Sample]: leading lines first, then one line per
    /// new message type, until either size limit is reached.
    pub fn from_text(text: &str, settings: &FallbackSettings) -> Self {
        let mut seen = HashSet::new();
        let mut lines = Vec::new();
        let mut size = 0;

        let candidates = text.lines().filter(|line| !line.trim().is_empty());

        for (nth, line) in candidates.enumerate() {
            if lines.len() >= settings.max_lines {
                break;
            }

            let kind = line_type(line);
            let line = truncate(line);

            if nth >= settings.head_lines && seen.contains(&kind) {
                continue;
            }

            if size + line.len() + 1 > settings.max_bytes && !lines.is_empty() {
                break;
            }

            size += line.len() + 1;
            seen.insert(kind);
            lines.push(line);
        }

        Self {
            types: seen.len(),
            lines,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Number of distinct message types
    pub fn types(&self) -> usize {
        self.types
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in self.lines.iter() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{Sample, line_type};
    use crate::settings::FallbackSettings;

    #[test]
    fn test_line_types() {
        assert_eq!(line_type("$GPGGA,123519,4807.038,N"), "GPGGA");
        assert_eq!(
            line_type("{\"sentence_type\":\"RMC\",\"timestamp_ms\":1}"),
            "RMC"
        );
        assert_eq!(line_type("{\"a\":1,\"b\":2}"), "json:2");
        assert_eq!(line_type("1700000000,48.11,11.51"), "fields:3");
        assert_eq!(line_type("POS 48.11 11.51"), "POS");
    }

    #[test]
    fn test_diversity() {
        let settings = FallbackSettings {
            head_lines: 2,
            max_lines: 10,
            ..Default::default()
        };

        let mut text = String::new();
        for _ in 0..100 {
            text.push_str("$GPGGA,1,2,3\n");
        }
        text.push_str("$GPRMC,1,2,3\n");
        text.push_str("$GPGSA,1,2,3\n");

        let sample = Sample::from_text(&text, &settings);
        assert_eq!(sample.len(), 4);
        assert_eq!(sample.types(), 3);

        let content = sample.to_string();
        assert!(content.contains("$GPRMC"));
        assert!(content.contains("$GPGSA"));
    }

    #[test]
    fn test_size_limits() {
        let settings = FallbackSettings {
            head_lines: 100,
            max_lines: 5,
            ..Default::default()
        };

        let text = (0..50).map(|i| format!("LINE{}", i)).collect::<Vec<_>>().join("\n");
        assert_eq!(Sample::from_text(&text, &settings).len(), 5);

        let settings = FallbackSettings {
            head_lines: 100,
            max_lines: 100,
            max_bytes: 64,
            ..Default::default()
        };

        let long = "x".repeat(1000);
        let sample = Sample::from_text(&format!("{}\n{}\n", long, long), &settings);
        assert_eq!(sample.len(), 1);
        assert!(sample.to_string().len() < 300);

        assert!(Sample::from_text("", &settings).is_empty());
    }
}
