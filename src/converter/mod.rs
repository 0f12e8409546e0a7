//! Canonical converter
use std::path::Path;

use log::{debug, warn};

use serde::Serialize;

use crate::{
    error::ConversionError,
    input::{FormatKind, RawInput},
    record::{
        CanonicalRecord,
        contract::{passes_gate, valid_fraction},
        write_jsonl,
    },
    settings::ConverterSettings,
};

pub mod nmea;
pub mod rinex;

/// Deterministic decoder
type Decoder = fn(&RawInput, &ConverterSettings) -> Result<Vec<CanonicalRecord>, ConversionError>;

/// Dispatch table
fn decoder(format: FormatKind) -> Option<(&'static str, Decoder)> {
    match format {
        FormatKind::Rinex => Some(("rinex", rinex::decode as Decoder)),
        FormatKind::Nmea => Some(("nmea", nmea::decode as Decoder)),
        FormatKind::Unknown => None,
    }
}

/// Conversion attempt summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionAttempt {
    /// Attempt number, starting at 1
    pub ordinal: usize,

    /// Deterministic procedure name, or generated procedure identifier
    pub source: String,

    /// Number of records produced
    pub record_count: usize,

    /// valid / total records
    pub valid_fraction: f64,
}

impl std::fmt::Display for ConversionAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "attempt #{} ({}): {} records, {:.1}% valid",
            self.ordinal,
            self.source,
            self.record_count,
            self.valid_fraction * 100.0
        )
    }
}

/// Successful deterministic conversion
#[derive(Debug, Clone)]
pub struct Conversion {
    pub records: Vec<CanonicalRecord>,
    pub attempt: ConversionAttempt,
}

/// Removes a partially written artifact
pub(crate) fn discard(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("{} - failed to remove partial artifact: {}", path.display(), e);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Converter {
    settings: ConverterSettings,
}

impl Converter {
    pub fn new(settings: ConverterSettings) -> Self {
        Self { settings }
    }

    /// Converts the [RawInput] to canonical records, written to `output`.
    /// The artifact is removed on any error.
    pub fn convert(&self, input: &RawInput, output: &Path) -> Result<Conversion, ConversionError> {
        let (source, decoder) = decoder(input.format())
            .ok_or_else(|| ConversionError::UnsupportedFormat(input.format().to_string()))?;

        let records = decoder(input, &self.settings)?;

        if records.is_empty() {
            return Err(ConversionError::NoRecords);
        }

        if let Err(e) = write_jsonl(output, &records) {
            discard(output);
            return Err(e.into());
        }

        let total = records.len();
        let valid = records.iter().filter(|r| r.is_valid()).count();

        if !passes_gate(valid, total, self.settings.threshold) {
            discard(output);
            return Err(ConversionError::ValidityGate { valid, total });
        }

        let attempt = ConversionAttempt {
            ordinal: 1,
            source: source.to_string(),
            record_count: total,
            valid_fraction: valid_fraction(valid, total),
        };

        debug!("{} - {}", input.filename(), attempt);

        Ok(Conversion { records, attempt })
    }
}

#[cfg(test)]
mod test {
    use super::Converter;
    use crate::{error::ConversionError, input::RawInput, settings::ConverterSettings};
    use std::io::Write;

    const GGA: &str =
        "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47,1700000000000";

    const GGA_NO_TIMESTAMP: &str =
        "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    fn nmea_file(dir: &tempfile::TempDir, lines: &[&str]) -> RawInput {
        let path = dir.path().join("test.nmea");
        let mut fd = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(fd, "{}", line).unwrap();
        }
        RawInput::new(path)
    }

    #[test]
    fn test_nmea_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let input = nmea_file(&dir, &[GGA]);
        let output = input.canonical_artifact(None);

        let conversion = Converter::default().convert(&input, &output).unwrap();
        assert_eq!(conversion.records.len(), 1);
        assert_eq!(conversion.attempt.source, "nmea");
        assert_eq!(conversion.attempt.valid_fraction, 1.0);

        let content = std::fs::read_to_string(&output).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"sentence_type\":\"GGA\""));
        assert!(content.contains("\"timestamp_ms\":1700000000000"));
    }

    #[test]
    fn test_gate_passes_at_half() {
        let dir = tempfile::tempdir().unwrap();
        let input = nmea_file(&dir, &[GGA, GGA_NO_TIMESTAMP]);
        let output = input.canonical_artifact(None);

        let conversion = Converter::default().convert(&input, &output).unwrap();
        assert_eq!(conversion.attempt.valid_fraction, 0.5);
        assert!(output.exists());
    }

    #[test]
    fn test_gate_fails_below_half() {
        let dir = tempfile::tempdir().unwrap();

        let mut lines = vec![GGA; 49];
        lines.extend(vec![GGA_NO_TIMESTAMP; 51]);

        let input = nmea_file(&dir, &lines);
        let output = input.canonical_artifact(None);

        match Converter::default().convert(&input, &output) {
            Err(ConversionError::ValidityGate { valid, total }) => {
                assert_eq!(valid, 49);
                assert_eq!(total, 100);
            },
            other => panic!("unexpected {:?}", other),
        }

        assert!(!output.exists(), "partial artifact should be removed");
    }

    #[test]
    fn test_configurable_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let input = nmea_file(&dir, &[GGA, GGA_NO_TIMESTAMP, GGA_NO_TIMESTAMP]);
        let output = input.canonical_artifact(None);

        let converter = Converter::new(ConverterSettings {
            threshold: 0.3,
            ..Default::default()
        });

        assert!(converter.convert(&input, &output).is_ok());
    }

    #[test]
    fn test_unsupported_and_empty() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("vendor.bin");
        std::fs::write(&path, b"\x01\x02").unwrap();
        let input = RawInput::new(&path);
        let output = input.canonical_artifact(None);

        match Converter::default().convert(&input, &output) {
            Err(ConversionError::UnsupportedFormat(format)) => assert_eq!(format, "unknown"),
            other => panic!("unexpected {:?}", other),
        }

        let input = nmea_file(&dir, &["garbage", "more garbage"]);
        let output = input.canonical_artifact(None);

        match Converter::default().convert(&input, &output) {
            Err(ConversionError::NoRecords) => {},
            other => panic!("unexpected {:?}", other),
        }
        assert!(!output.exists());
    }
}
