//! RINEX observation decoder
use std::io::Write;

use itertools::Itertools;
use log::debug;

use rinex::prelude::Rinex;

use crate::{
    error::ConversionError,
    input::RawInput,
    record::{CanonicalRecord, Scalar},
    settings::ConverterSettings,
    utils::epoch_unix_ms,
};

/// Parses the [RawInput], decompressed and re-encoded as UTF-8 first.
fn parse(input: &RawInput, settings: &ConverterSettings) -> Result<Rinex, ConversionError> {
    let text = input.text(&settings.encodings)?;

    let mut tmp = tempfile::NamedTempFile::new()?;
    tmp.write_all(text.as_bytes())?;
    tmp.flush()?;

    Rinex::from_file(tmp.path()).map_err(|e| ConversionError::Rinex(e.to_string()))
}

/// Decodes a RINEX observation [RawInput] into per satellite & epoch rows,
/// in chronological order.
pub fn decode(
    input: &RawInput,
    settings: &ConverterSettings,
) -> Result<Vec<CanonicalRecord>, ConversionError> {
    let rinex = parse(input, settings)?;

    let record = rinex
        .record
        .as_obs()
        .ok_or_else(|| ConversionError::Rinex("not an observation RINEX".to_string()))?;

    let mut records = Vec::new();

    for (key, observations) in record.iter() {
        let timestamp_ms = epoch_unix_ms(key.epoch);

        for sv in observations.signals.iter().map(|sig| sig.sv).unique() {
            let mut canonical = CanonicalRecord::new(Some(timestamp_ms), None);

            for signal in observations.signals.iter().filter(|sig| sig.sv == sv) {
                if !signal.value.is_finite() {
                    continue;
                }

                let observable = signal.observable.to_string();
                let code = observable.get(..2).unwrap_or(&observable);

                // first occurrence wins
                if canonical.get(code).is_none() {
                    canonical.set(code, Scalar::Float(signal.value));
                }
            }

            if canonical.fields().next().is_none() {
                continue;
            }

            let id = sv.to_string();
            let (system, number) = id.split_at(1.min(id.len()));

            canonical.set("sv", Scalar::Text(id.clone()));
            canonical.set("satellite_system", Scalar::Text(system.to_string()));
            canonical.set("satellite_number", Scalar::Text(number.to_string()));
            canonical.set("time", Scalar::Time(key.epoch));

            records.push(canonical);
        }
    }

    debug!(
        "{} - {} epochs, {} satellite rows",
        input.filename(),
        record.len(),
        records.len()
    );

    Ok(records)
}
