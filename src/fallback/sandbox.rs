//! Generated procedure interpreter.
//!
//! Generated procedures are declarative JSON programs. They only ever
//! see the input (read) and output (write) paths, plus the allow-listed
//! [Binding]s. A program looks like:
//!
//! ```json
//! {
//!   "source": "lines",
//!   "skip": ["^#"],
//!   "rules": [{
//!     "match": "^\\$..GGA",
//!     "split": ",",
//!     "fields": {
//!       "sentence_type": { "value": "GGA" },
//!       "timestamp_ms": { "from": 15, "as": "unix_millis" },
//!       "latitude": { "from": 2, "as": "nmea_latitude", "hemisphere": 3 }
//!     }
//!   }]
//! }
//! ```
use std::{collections::BTreeMap, io::Write, path::Path, str::FromStr};

use hifitime::prelude::{Epoch, TimeScale};
use log::debug;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    error::SandboxError,
    input::{Encoding, read_text},
    utils::{Axis, epoch_unix_ms, nmea_to_decimal},
};

/// Program text size limit, in bytes
const MAX_PROGRAM_BYTES: usize = 64 * 1024;

/// Compiled regex size limit, in bytes
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Maximal number of rules
const MAX_RULES: usize = 64;

/// Maximal number of fields per rule
const MAX_FIELDS: usize = 64;

/// Maximal number of produced records
const MAX_RECORDS: usize = 5_000_000;

/// Maximal number of per line diagnostics kept in the trace
const MAX_DIAGNOSTICS: usize = 20;

/// How input lines are presented to the rules
#[derive(Debug, Copy, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Plain text lines
    #[default]
    Lines,
    /// One JSON object per line
    Jsonl,
}

/// Allow-listed value conversions
#[derive(Debug, Copy, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    /// integer, float or text, whichever parses first
    #[default]
    Auto,
    Text,
    Int,
    Float,
    NmeaLatitude,
    NmeaLongitude,
    UnixSeconds,
    UnixMillis,
    Iso8601,
    GpsWeekTow,
}

/// Field reference: token / capture group index, or
/// capture group name / JSON key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Reference {
    Index(usize),
    Name(String),
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(index) => write!(f, "#{}", index),
            Self::Name(name) => write!(f, "\"{}\"", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldProgram {
    from: Option<Reference>,
    #[serde(default, rename = "as")]
    binding: Binding,
    hemisphere: Option<Reference>,
    week: Option<Reference>,
    scale: Option<f64>,
    value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleProgram {
    #[serde(rename = "match")]
    pattern: Option<String>,
    split: Option<String>,
    fields: BTreeMap<String, FieldProgram>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Program {
    #[serde(default)]
    source: Source,
    #[serde(default)]
    skip: Vec<String>,
    rules: Vec<RuleProgram>,
}

fn compile_regex(pattern: &str) -> Result<Regex, SandboxError> {
    RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| SandboxError::Syntax(format!("invalid regex \"{}\": {}", pattern, e)))
}

#[derive(Debug, Clone)]
enum Field {
    Constant(Value),
    Bound {
        from: Reference,
        binding: Binding,
        hemisphere: Option<Reference>,
        week: Option<Reference>,
        scale: Option<f64>,
    },
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: Option<Regex>,
    split: Option<String>,
    fields: Vec<(String, Field)>,
}

impl Rule {
    /// Verifies a [Reference] can be resolved by this rule
    fn check(&self, source: Source, reference: &Reference) -> Result<(), String> {
        match (source, reference, &self.split, &self.pattern) {
            (Source::Jsonl, Reference::Name(_), _, _) => Ok(()),
            (Source::Jsonl, Reference::Index(_), _, _) => {
                Err("jsonl sources are referenced by key".to_string())
            },
            (Source::Lines, Reference::Index(_), Some(_), _) => Ok(()),
            (Source::Lines, Reference::Name(_), Some(_), _) => {
                Err("split tokens are referenced by index".to_string())
            },
            (Source::Lines, _, None, None) => {
                Err("line rules need either \"split\" or a \"match\" regex".to_string())
            },
            (Source::Lines, Reference::Index(index), None, Some(regex)) => {
                if *index < regex.captures_len() {
                    Ok(())
                } else {
                    Err(format!("no capture group {}", index))
                }
            },
            (Source::Lines, Reference::Name(name), None, Some(regex)) => {
                if regex.capture_names().flatten().any(|n| n == name) {
                    Ok(())
                } else {
                    Err(format!("no capture group named \"{}\"", name))
                }
            },
        }
    }
}

/// Compiled [Program], ready to run
#[derive(Debug, Clone)]
pub struct Procedure {
    source: Source,
    skip: Vec<Regex>,
    rules: Vec<Rule>,
}

impl FromStr for Procedure {
    type Err = SandboxError;

    /// Parses and compiles a program. Any error is a syntax error.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.len() > MAX_PROGRAM_BYTES {
            return Err(SandboxError::Syntax(format!(
                "program exceeds {} bytes",
                MAX_PROGRAM_BYTES
            )));
        }

        let program: Program =
            serde_json::from_str(text).map_err(|e| SandboxError::Syntax(e.to_string()))?;

        if program.rules.is_empty() {
            return Err(SandboxError::Syntax("program has no rules".to_string()));
        }

        if program.rules.len() > MAX_RULES {
            return Err(SandboxError::Syntax(format!(
                "at most {} rules are allowed",
                MAX_RULES
            )));
        }

        let skip = program
            .skip
            .iter()
            .map(|pattern| compile_regex(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rules = Vec::with_capacity(program.rules.len());

        for (nth, rule) in program.rules.into_iter().enumerate() {
            if rule.fields.is_empty() || rule.fields.len() > MAX_FIELDS {
                return Err(SandboxError::Syntax(format!(
                    "rule #{}: expecting 1 to {} fields",
                    nth, MAX_FIELDS
                )));
            }

            let mut compiled = Rule {
                pattern: rule.pattern.as_deref().map(compile_regex).transpose()?,
                split: rule.split.filter(|s| !s.is_empty()),
                fields: Vec::with_capacity(rule.fields.len()),
            };

            for (name, field) in rule.fields.into_iter() {
                let syntax = |e: String| {
                    SandboxError::Syntax(format!("rule #{} field \"{}\": {}", nth, name, e))
                };

                let field = match (field.value, field.from) {
                    (Some(value), None) => Field::Constant(value),
                    (None, Some(from)) => {
                        for reference in [Some(&from), field.hemisphere.as_ref(), field.week.as_ref()]
                            .into_iter()
                            .flatten()
                        {
                            compiled.check(program.source, reference).map_err(syntax)?;
                        }

                        match field.binding {
                            Binding::NmeaLatitude | Binding::NmeaLongitude
                                if field.hemisphere.is_none() =>
                            {
                                return Err(syntax("\"hemisphere\" is required".to_string()));
                            },
                            Binding::GpsWeekTow if field.week.is_none() => {
                                return Err(syntax("\"week\" is required".to_string()));
                            },
                            _ => {},
                        }

                        Field::Bound {
                            from,
                            binding: field.binding,
                            hemisphere: field.hemisphere,
                            week: field.week,
                            scale: field.scale,
                        }
                    },
                    _ => {
                        return Err(syntax(
                            "expecting exactly one of \"from\" or \"value\"".to_string(),
                        ));
                    },
                };

                compiled.fields.push((name, field));
            }

            rules.push(compiled);
        }

        Ok(Self {
            source: program.source,
            skip,
            rules,
        })
    }
}

/// What a rule sees of one input line
enum Context<'a> {
    Tokens(Vec<&'a str>),
    Captures(regex::Captures<'a>),
    Object(&'a Map<String, Value>),
}

impl Context<'_> {
    /// Textual value of a [Reference], None when missing or empty
    fn lookup(&self, reference: &Reference) -> Option<String> {
        let text = match (self, reference) {
            (Self::Tokens(tokens), Reference::Index(index)) => tokens.get(*index)?.to_string(),
            (Self::Captures(captures), Reference::Index(index)) => {
                captures.get(*index)?.as_str().to_string()
            },
            (Self::Captures(captures), Reference::Name(name)) => {
                captures.name(name)?.as_str().to_string()
            },
            (Self::Object(object), Reference::Name(name)) => match object.get(name)? {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            _ => return None,
        };

        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

fn number(value: f64) -> Result<Value, String> {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| format!("non finite value {}", value))
}

fn scaled(value: f64, scale: Option<f64>) -> f64 {
    value * scale.unwrap_or(1.0)
}

/// Applies a [Binding]
fn bind(
    context: &Context<'_>,
    from: &Reference,
    binding: Binding,
    hemisphere: Option<&Reference>,
    week: Option<&Reference>,
    scale: Option<f64>,
) -> Result<Value, String> {
    let Some(text) = context.lookup(from) else {
        return Ok(Value::Null);
    };

    let float = |text: &str| {
        text.parse::<f64>()
            .map_err(|_| format!("{} \"{}\" is not a number", from, text))
    };

    let coordinate = |axis: Axis| -> Result<Value, String> {
        let hemisphere = hemisphere
            .and_then(|h| context.lookup(h))
            .ok_or_else(|| "missing hemisphere".to_string())?;

        let decimal = nmea_to_decimal(&text, &hemisphere, axis)
            .ok_or_else(|| format!("invalid coordinate \"{}\" \"{}\"", text, hemisphere))?;

        number(decimal)
    };

    match binding {
        Binding::Text => Ok(Value::String(text)),
        Binding::Auto => {
            if scale.is_none() {
                if let Ok(value) = text.parse::<i64>() {
                    return Ok(Value::from(value));
                }
            }
            match text.parse::<f64>() {
                Ok(value) => number(scaled(value, scale)),
                Err(_) => Ok(Value::String(text)),
            }
        },
        Binding::Int => {
            let value = scaled(float(&text)?, scale).round();
            Ok(Value::from(value as i64))
        },
        Binding::Float => number(scaled(float(&text)?, scale)),
        Binding::NmeaLatitude => coordinate(Axis::Latitude),
        Binding::NmeaLongitude => coordinate(Axis::Longitude),
        Binding::UnixSeconds => {
            let seconds = scaled(float(&text)?, scale);
            Ok(Value::from((seconds * 1000.0).round() as i64))
        },
        Binding::UnixMillis => {
            let millis = scaled(float(&text)?, scale);
            Ok(Value::from(millis.round() as i64))
        },
        Binding::Iso8601 => {
            let trimmed = text.trim_end_matches('Z');
            let epoch = Epoch::from_str(trimmed)
                .map_err(|e| format!("invalid datetime \"{}\": {}", text, e))?;
            Ok(Value::from(epoch_unix_ms(epoch)))
        },
        Binding::GpsWeekTow => {
            let week = week
                .and_then(|w| context.lookup(w))
                .ok_or_else(|| "missing week".to_string())?;

            let week = week
                .parse::<u32>()
                .map_err(|_| format!("invalid week \"{}\"", week))?;

            let tow = scaled(float(&text)?, scale);
            if !(0.0..604_800.0).contains(&tow) {
                return Err(format!("time of week {} out of range", tow));
            }

            let nanos = (tow * 1.0E9).round() as u64;
            let epoch = Epoch::from_time_of_week(week, nanos, TimeScale::GPST);
            Ok(Value::from(epoch_unix_ms(epoch)))
        },
    }
}

/// Execution report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    /// Produced records
    pub records: Vec<Value>,

    /// Execution trace, fed back on failure
    pub trace: Vec<String>,
}

impl Procedure {
    /// Runs this procedure on `input`, writing one JSON object per line to `output`.
    pub fn run(
        &self,
        input: &Path,
        gzip: bool,
        encodings: &[Encoding],
        output: &Path,
    ) -> Result<Execution, SandboxError> {
        let text = read_text(input, gzip, encodings)?;

        let mut execution = Execution::default();
        let mut diagnostics = Vec::new();
        let mut hits = vec![0usize; self.rules.len()];
        let (mut lines, mut skipped, mut unmatched) = (0, 0, 0);

        for (nth, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');

            if line.trim().is_empty() {
                continue;
            }

            lines += 1;

            if self.skip.iter().any(|regex| regex.is_match(line)) {
                skipped += 1;
                continue;
            }

            let object = match self.source {
                Source::Jsonl => match serde_json::from_str::<Value>(line) {
                    Ok(Value::Object(object)) => Some(object),
                    _ => {
                        unmatched += 1;
                        if diagnostics.len() < MAX_DIAGNOSTICS {
                            diagnostics.push(format!("line {}: not a JSON object", nth + 1));
                        }
                        continue;
                    },
                },
                Source::Lines => None,
            };

            let selected = self.rules.iter().enumerate().find_map(|(index, rule)| {
                let context = match (&object, &rule.pattern, &rule.split) {
                    (Some(object), Some(regex), _) => {
                        if regex.is_match(line) {
                            Context::Object(object)
                        } else {
                            return None;
                        }
                    },
                    (Some(object), None, _) => Context::Object(object),
                    (None, Some(regex), Some(split)) => {
                        if regex.is_match(line) {
                            Context::Tokens(line.split(split.as_str()).collect())
                        } else {
                            return None;
                        }
                    },
                    (None, None, Some(split)) => {
                        Context::Tokens(line.split(split.as_str()).collect())
                    },
                    (None, Some(regex), None) => Context::Captures(regex.captures(line)?),
                    (None, None, None) => return None,
                };
                Some((index, rule, context))
            });

            let Some((index, rule, context)) = selected else {
                unmatched += 1;
                continue;
            };

            hits[index] += 1;

            let mut record = Map::new();

            for (name, field) in rule.fields.iter() {
                let value = match field {
                    Field::Constant(value) => Ok(value.clone()),
                    Field::Bound {
                        from,
                        binding,
                        hemisphere,
                        week,
                        scale,
                    } => bind(
                        &context,
                        from,
                        *binding,
                        hemisphere.as_ref(),
                        week.as_ref(),
                        *scale,
                    ),
                };

                match value {
                    Ok(value) => {
                        record.insert(name.clone(), value);
                    },
                    Err(e) => {
                        if diagnostics.len() < MAX_DIAGNOSTICS {
                            diagnostics.push(format!("line {}: field \"{}\": {}", nth + 1, name, e));
                        }
                        record.insert(name.clone(), Value::Null);
                    },
                }
            }

            execution.records.push(Value::Object(record));

            if execution.records.len() >= MAX_RECORDS {
                diagnostics.push(format!("stopped after {} records", MAX_RECORDS));
                break;
            }
        }

        execution.trace.push(format!(
            "{} lines: {} skipped, {} unmatched, {} records",
            lines,
            skipped,
            unmatched,
            execution.records.len()
        ));

        for (index, count) in hits.iter().enumerate() {
            execution
                .trace
                .push(format!("rule #{} matched {} lines", index, count));
        }

        execution.trace.extend(diagnostics);

        debug!("{} - {}", input.display(), execution.trace[0]);

        if execution.records.is_empty() {
            return Err(SandboxError::NoOutput);
        }

        let fd = std::fs::File::create(output)?;
        let mut writer = std::io::BufWriter::new(fd);

        for record in execution.records.iter() {
            serde_json::to_writer(&mut writer, record).map_err(std::io::Error::from)?;
            writer.write_all(b"\n")?;
        }

        writer.flush()?;
        Ok(execution)
    }
}
