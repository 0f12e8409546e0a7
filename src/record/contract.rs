//! Field contracts, shared by deterministic stages and generated procedures
use std::{collections::BTreeMap, path::Path};

use itertools::Itertools;
use serde_json::Value;

use crate::record::{
    CanonicalRecord, write_jsonl,
    location::{Bounds, LocationRecord, Rejection},
};

/// Contract field description
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: &'static str,
    pub description: &'static str,
}

const fn field(name: &'static str, kind: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        description,
    }
}

const CANONICAL_REQUIRED: &[FieldSpec] = &[field(
    "timestamp_ms",
    "integer",
    "milliseconds since 1970-01-01T00:00:00 UTC",
)];

const CANONICAL_OPTIONAL: &[FieldSpec] = &[
    field("sentence_type", "string", "NMEA sentence type without talker, e.g. GGA"),
    field("sv", "string", "satellite identifier, e.g. G01"),
    field("satellite_system", "string", "constellation letter, e.g. G"),
    field("satellite_number", "string", "satellite number, e.g. 01"),
    field("latitude", "float", "decimal degrees"),
    field("longitude", "float", "decimal degrees"),
    field("altitude", "float", "meters"),
    field("C1", "float", "observable keyed by its 2-letter RINEX code"),
];

const LOCATION_REQUIRED: &[FieldSpec] = &[field(
    "timestamp_ms",
    "integer",
    "milliseconds since 1970-01-01T00:00:00 UTC, strictly positive",
)];

const LOCATION_OPTIONAL: &[FieldSpec] = &[
    field("latitude", "float", "decimal degrees"),
    field("longitude", "float", "decimal degrees"),
    field("altitude", "float", "meters"),
    field("speed", "float", "meters per second"),
    field("course", "float", "degrees"),
    field("hdop", "float", "horizontal dilution of precision"),
    field("pdop", "float", "position dilution of precision"),
    field("num_satellites", "integer", "satellites in use"),
    field("quality", "integer", "fix quality indicator"),
    field("satellite_system", "string", "constellation letter, e.g. G"),
    field("satellite_number", "string", "satellite number, e.g. 01"),
    field("pseudorange", "float", "meters"),
    field("carrier_phase", "float", "cycles"),
    field("doppler", "float", "Hz"),
    field("signal_strength", "float", "dB-Hz"),
];

/// Valid fraction of a batch
pub fn valid_fraction(valid: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        valid as f64 / total as f64
    }
}

/// Minimal yield gate: valid fraction ≥ threshold and at least one valid record
pub fn passes_gate(valid: usize, total: usize, threshold: f64) -> bool {
    valid > 0 && valid_fraction(valid, total) >= threshold
}

/// Records that passed a [FieldContract]
#[derive(Debug, Clone, PartialEq)]
pub enum Accepted {
    Canonical(Vec<CanonicalRecord>),
    Location(Vec<LocationRecord>),
}

impl Accepted {
    pub fn len(&self) -> usize {
        match self {
            Self::Canonical(records) => records.len(),
            Self::Location(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records satisfying the contract. Canonical records without
    /// timestamp are accepted but not counted.
    pub fn valid(&self) -> usize {
        match self {
            Self::Canonical(records) => records.iter().filter(|r| r.is_valid()).count(),
            Self::Location(records) => records.len(),
        }
    }

    /// (Re)writes the artifact, with accepted records only
    pub fn write(&self, path: &Path) -> std::io::Result<usize> {
        match self {
            Self::Canonical(records) => write_jsonl(path, records),
            Self::Location(records) => write_jsonl(path, records),
        }
    }
}

/// Contract enforced on a record stream, by both paths of a stage
#[derive(Debug, Clone, PartialEq)]
pub enum FieldContract {
    /// Canonical records, accepted above this valid fraction
    Canonical { threshold: f64 },

    /// Location records, within these [Bounds]
    Location { bounds: Bounds },
}

impl FieldContract {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Canonical { .. } => "canonical",
            Self::Location { .. } => "location",
        }
    }

    pub fn required(&self) -> &'static [FieldSpec] {
        match self {
            Self::Canonical { .. } => CANONICAL_REQUIRED,
            Self::Location { .. } => LOCATION_REQUIRED,
        }
    }

    pub fn optional(&self) -> &'static [FieldSpec] {
        match self {
            Self::Canonical { .. } => CANONICAL_OPTIONAL,
            Self::Location { .. } => LOCATION_OPTIONAL,
        }
    }

    /// Human readable description
    pub fn describe(&self) -> String {
        let list = |fields: &[FieldSpec]| {
            fields
                .iter()
                .map(|f| format!("- {} ({}): {}", f.name, f.kind, f.description))
                .join("\n")
        };

        let mut description = format!(
            "Required fields:\n{}\nOptional fields:\n{}\n",
            list(self.required()),
            list(self.optional())
        );

        match self {
            Self::Canonical { threshold } => {
                description.push_str(&format!(
                    "At least {:.0}% of the records must carry timestamp_ms.\n",
                    threshold * 100.0
                ));
            },
            Self::Location { bounds } => {
                description.push_str(&format!(
                    "Bounds (inclusive): latitude {:?}, longitude {:?}, altitude {:?}, speed {:?}, course {:?}, hdop {:?}, pdop {:?}, num_satellites {:?}.\n",
                    bounds.latitude,
                    bounds.longitude,
                    bounds.altitude,
                    bounds.speed,
                    bounds.course,
                    bounds.hdop,
                    bounds.pdop,
                    bounds.num_satellites,
                ));
                description.push_str(
                    "Each record needs latitude+longitude, or satellite_system+satellite_number with at least one of pseudorange, carrier_phase, doppler, signal_strength.\n",
                );
            },
        }

        description
    }

    /// Validates an untrusted record stream
    pub fn validate(&self, values: &[Value]) -> Result<Accepted, String> {
        match self {
            Self::Canonical { threshold } => {
                let records = values
                    .iter()
                    .filter_map(|value| CanonicalRecord::try_from(value).ok())
                    .collect::<Vec<_>>();

                let total = values.len();
                let valid = records.iter().filter(|r| r.is_valid()).count();

                if passes_gate(valid, total, *threshold) {
                    Ok(Accepted::Canonical(records))
                } else {
                    Err(format!(
                        "only {}/{} records are JSON objects carrying an integer timestamp_ms, {:.0}% required",
                        valid,
                        total,
                        threshold * 100.0
                    ))
                }
            },
            Self::Location { bounds } => {
                let mut rejections = BTreeMap::<Rejection, usize>::new();
                let mut records = Vec::with_capacity(values.len());

                for value in values {
                    match LocationRecord::from_json(value).and_then(|record| {
                        record.validate(bounds)?;
                        Ok(record)
                    }) {
                        Ok(record) => records.push(record),
                        Err(rejection) => *rejections.entry(rejection).or_default() += 1,
                    }
                }

                if records.is_empty() {
                    let reasons = rejections
                        .iter()
                        .map(|(reason, count)| format!("{} ({})", reason, count))
                        .join(", ");

                    Err(format!(
                        "no valid location record out of {}: {}",
                        values.len(),
                        reasons
                    ))
                } else {
                    Ok(Accepted::Location(records))
                }
            },
        }
    }
}
