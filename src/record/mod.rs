//! Canonical & location records
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use hifitime::prelude::Epoch;

use serde::{Serialize, Serializer, ser::SerializeMap};
use serde_json::Value;

use crate::utils::to_iso8601;

pub mod contract;
pub mod location;

pub use contract::{Accepted, FieldContract};
pub use location::{Bounds, LocationRecord, Rejection};

/// Canonical key of the record timestamp
pub const TIMESTAMP_KEY: &str = "timestamp_ms";

/// Canonical key of the NMEA sentence type
pub const SENTENCE_TYPE_KEY: &str = "sentence_type";

/// Canonical record value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Time(Epoch),
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Integer(value) => serializer.serialize_i64(*value),
            Self::Float(value) => {
                if value.is_finite() {
                    serializer.serialize_f64(*value)
                } else {
                    serializer.serialize_none()
                }
            },
            Self::Text(value) => serializer.serialize_str(value),
            Self::Time(epoch) => serializer.serialize_str(&to_iso8601(*epoch)),
        }
    }
}

impl From<&Value> for Scalar {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(*value),
            Value::Number(number) => {
                if let Some(value) = number.as_i64() {
                    Self::Integer(value)
                } else if let Some(value) = number.as_f64() {
                    Self::Float(value)
                } else {
                    Self::Text(number.to_string())
                }
            },
            Value::String(value) => Self::Text(value.clone()),
            // nested values are kept as text
            other => Self::Text(other.to_string()),
        }
    }
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numerical interpretation. Text is parsed, non finite values are discarded.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Integer(value) => *value as f64,
            Self::Float(value) => *value,
            Self::Text(value) => value.trim().parse::<f64>().ok()?,
            _ => return None,
        };

        if value.is_finite() { Some(value) } else { None }
    }

    /// Integer interpretation. Integral floats are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Float(value) => {
                if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0E15 {
                    Some(*value as i64)
                } else {
                    None
                }
            },
            Self::Text(value) => {
                let value = value.trim();
                value
                    .parse::<i64>()
                    .ok()
                    .or_else(|| Self::Float(value.parse::<f64>().ok()?).as_i64())
            },
            _ => None,
        }
    }

    /// Textual value, when stored as text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// Format agnostic record. Once produced, carries `timestamp_ms`,
/// NMEA records also carry their `sentence_type`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalRecord {
    pub timestamp_ms: Option<i64>,
    pub sentence_type: Option<String>,
    fields: BTreeMap<String, Scalar>,
}

impl CanonicalRecord {
    pub fn new(timestamp_ms: Option<i64>, sentence_type: Option<&str>) -> Self {
        Self {
            timestamp_ms,
            sentence_type: sentence_type.map(|s| s.to_string()),
            fields: Default::default(),
        }
    }

    /// Stores a new field. The two reserved keys update the dedicated members.
    pub fn set(&mut self, key: &str, value: Scalar) {
        match key {
            TIMESTAMP_KEY => self.timestamp_ms = value.as_i64(),
            SENTENCE_TYPE_KEY => {
                self.sentence_type = match value {
                    Scalar::Text(text) => Some(text),
                    Scalar::Null => None,
                    other => Some(serde_json::to_string(&other).unwrap_or_default()),
                }
            },
            _ => {
                self.fields.insert(key.to_string(), value);
            },
        }
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.fields.get(key)
    }

    /// First non null value among these aliases
    pub fn get_any(&self, keys: &[&str]) -> Option<&Scalar> {
        keys.iter()
            .filter_map(|key| self.fields.get(*key))
            .find(|value| !value.is_null())
    }

    /// Iterates over all fields, reserved keys excepted
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// A canonical record is valid once it carries a timestamp
    pub fn is_valid(&self) -> bool {
        self.timestamp_ms.is_some()
    }
}

impl Serialize for CanonicalRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let timestamp = self.timestamp_ms.map(Scalar::Integer);
        let sentence_type = self.sentence_type.clone().map(Scalar::Text);

        let mut entries = self
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect::<BTreeMap<_, _>>();

        if let Some(timestamp) = &timestamp {
            entries.insert(TIMESTAMP_KEY, timestamp);
        }

        if let Some(sentence_type) = &sentence_type {
            entries.insert(SENTENCE_TYPE_KEY, sentence_type);
        }

        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl TryFrom<&Value> for CanonicalRecord {
    type Error = String;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("expecting a JSON object, got {}", value))?;

        let mut record = Self::default();
        for (key, value) in object.iter() {
            record.set(key, Scalar::from(value));
        }
        Ok(record)
    }
}

/// Writes one JSON object per line, truncating any previous content.
/// Returns the number of records written.
pub fn write_jsonl<'a, T: Serialize + 'a>(
    path: &Path,
    records: impl IntoIterator<Item = &'a T>,
) -> std::io::Result<usize> {
    let fd = File::create(path)?;
    let mut writer = BufWriter::new(fd);
    let mut count = 0;

    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
        count += 1;
    }

    writer.flush()?;
    Ok(count)
}

#[cfg(test)]
mod test {
    use super::{CanonicalRecord, Scalar};
    use hifitime::prelude::Epoch;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_scalar_serialization() {
        assert_eq!(serde_json::to_string(&Scalar::Null).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Scalar::Float(f64::NAN)).unwrap(), "null");
        assert_eq!(
            serde_json::to_string(&Scalar::Float(f64::INFINITY)).unwrap(),
            "null"
        );
        assert_eq!(serde_json::to_string(&Scalar::Float(0.9)).unwrap(), "0.9");
        assert_eq!(serde_json::to_string(&Scalar::Integer(8)).unwrap(), "8");

        let t = Epoch::from_str("2023-11-14T22:13:20 UTC").unwrap();
        assert_eq!(
            serde_json::to_string(&Scalar::Time(t)).unwrap(),
            "\"2023-11-14T22:13:20\""
        );
    }

    #[test]
    fn test_scalar_interpretation() {
        assert_eq!(Scalar::Text("545.4".to_string()).as_f64(), Some(545.4));
        assert_eq!(Scalar::Text("08".to_string()).as_i64(), Some(8));
        assert_eq!(Scalar::Float(8.0).as_i64(), Some(8));
        assert_eq!(Scalar::Float(8.5).as_i64(), None);
        assert_eq!(Scalar::Float(f64::NAN).as_f64(), None);
        assert_eq!(Scalar::Null.as_f64(), None);
        assert_eq!(Scalar::Text("abc".to_string()).as_f64(), None);
    }

    #[test]
    fn test_record_serialization() {
        let mut record = CanonicalRecord::new(Some(1_700_000_000_000), Some("GGA"));
        record.set("lat", Scalar::Text("4807.038".to_string()));
        record.set("altitude", Scalar::Float(545.4));
        record.set("age_gps_data", Scalar::Null);

        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(
            line,
            "{\"age_gps_data\":null,\"altitude\":545.4,\"lat\":\"4807.038\",\"sentence_type\":\"GGA\",\"timestamp_ms\":1700000000000}"
        );
    }

    #[test]
    fn test_record_from_json() {
        let value = json!({
            "timestamp_ms": 1700000000000_i64,
            "sentence_type": "RMC",
            "spd_over_grnd": 22.4,
            "nested": {"a": 1},
        });

        let record = CanonicalRecord::try_from(&value).unwrap();
        assert_eq!(record.timestamp_ms, Some(1_700_000_000_000));
        assert_eq!(record.sentence_type.as_deref(), Some("RMC"));
        assert_eq!(record.get("spd_over_grnd"), Some(&Scalar::Float(22.4)));
        assert_eq!(
            record.get("nested"),
            Some(&Scalar::Text("{\"a\":1}".to_string()))
        );
        assert!(record.is_valid());

        let record = CanonicalRecord::try_from(&json!({"timestamp_ms": "soon"})).unwrap();
        assert!(!record.is_valid());

        assert!(CanonicalRecord::try_from(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_aliases() {
        let mut record = CanonicalRecord::default();
        record.set("num_sats", Scalar::Null);
        record.set("num_satellites", Scalar::Integer(8));
        assert_eq!(
            record.get_any(&["num_sats", "num_satellites"]),
            Some(&Scalar::Integer(8))
        );
        assert!(record.get_any(&["hdop"]).is_none());
    }
}
