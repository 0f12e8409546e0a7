use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use gnss::prelude::Constellation;

use crate::{record::Scalar, utils::in_range};

/// Inclusive bounds of the positioning contract
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    /// Latitude (decimal degrees)
    pub latitude: (f64, f64),

    /// Longitude (decimal degrees)
    pub longitude: (f64, f64),

    /// Altitude (meters)
    pub altitude: (f64, f64),

    /// Speed over ground (m/s)
    pub speed: (f64, f64),

    /// Course over ground (degrees)
    pub course: (f64, f64),

    pub hdop: (f64, f64),

    pub pdop: (f64, f64),

    pub num_satellites: (f64, f64),
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            latitude: (-90.0, 90.0),
            longitude: (-180.0, 180.0),
            altitude: (-1000.0, 9000.0),
            speed: (0.0, 278.0),
            course: (0.0, 360.0),
            hdop: (0.0, 50.0),
            pdop: (0.0, 50.0),
            num_satellites: (0.0, 50.0),
        }
    }
}

/// Reason why a [LocationRecord] was rejected
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rejection {
    /// Malformed record (wrong type, not an object..)
    Malformed,

    /// Missing or non positive timestamp
    Timestamp,

    /// Named field is out of bounds
    OutOfBounds(&'static str),

    /// Incomplete satellite identification or missing observable
    IncompleteSatellite,

    /// Unknown satellite system
    UnknownConstellation,

    /// No has-position signal
    NoPosition,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed record"),
            Self::Timestamp => write!(f, "missing or invalid timestamp_ms"),
            Self::OutOfBounds(field) => write!(f, "{} out of bounds", field),
            Self::IncompleteSatellite => write!(
                f,
                "satellite_system, satellite_number and one observable are required"
            ),
            Self::UnknownConstellation => write!(f, "unknown satellite_system"),
            Self::NoPosition => write!(f, "no position signal"),
        }
    }
}

/// Positioning contract record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocationRecord {
    pub timestamp_ms: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hdop: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdop: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_satellites: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub satellite_system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub satellite_number: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pseudorange: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier_phase: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub doppler: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<f64>,
}

impl LocationRecord {
    /// True if at least one raw observable is present
    pub fn has_observable(&self) -> bool {
        self.pseudorange.is_some()
            || self.carrier_phase.is_some()
            || self.doppler.is_some()
            || self.signal_strength.is_some()
    }

    /// True if a latitude/longitude pair is present
    pub fn has_fix(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Verifies the positioning contract
    pub fn validate(&self, bounds: &Bounds) -> Result<(), Rejection> {
        if self.timestamp_ms <= 0 {
            return Err(Rejection::Timestamp);
        }

        let bounded = [
            ("latitude", self.latitude, bounds.latitude),
            ("longitude", self.longitude, bounds.longitude),
            ("altitude", self.altitude, bounds.altitude),
            ("speed", self.speed, bounds.speed),
            ("course", self.course, bounds.course),
            ("hdop", self.hdop, bounds.hdop),
            ("pdop", self.pdop, bounds.pdop),
            (
                "num_satellites",
                self.num_satellites.map(|n| n as f64),
                bounds.num_satellites,
            ),
        ];

        for (field, value, range) in bounded {
            if let Some(value) = value {
                if !in_range(value, range) {
                    return Err(Rejection::OutOfBounds(field));
                }
            }
        }

        let observables = [
            ("pseudorange", self.pseudorange),
            ("carrier_phase", self.carrier_phase),
            ("doppler", self.doppler),
            ("signal_strength", self.signal_strength),
        ];

        for (field, value) in observables {
            if let Some(value) = value {
                if !value.is_finite() {
                    return Err(Rejection::OutOfBounds(field));
                }
            }
        }

        let satellite = self.satellite_system.is_some() || self.satellite_number.is_some();

        if satellite || self.has_observable() {
            let number_ok = self
                .satellite_number
                .as_ref()
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));

            if self.satellite_system.is_none() || !number_ok || !self.has_observable() {
                return Err(Rejection::IncompleteSatellite);
            }

            if let Some(system) = &self.satellite_system {
                if Constellation::from_str(system.trim()).is_err() {
                    return Err(Rejection::UnknownConstellation);
                }
            }
        }

        if !self.has_fix() && !(satellite && self.has_observable()) {
            return Err(Rejection::NoPosition);
        }

        Ok(())
    }

    /// Lenient interpretation of a JSON object, as produced by a
    /// generated procedure. Numbers may be encoded as text.
    pub fn from_json(value: &Value) -> Result<Self, Rejection> {
        let object = value.as_object().ok_or(Rejection::Malformed)?;

        let scalar = |key: &str| object.get(key).map(Scalar::from).filter(|s| !s.is_null());

        let float = |key: &str| -> Result<Option<f64>, Rejection> {
            match scalar(key) {
                Some(value) => match value.as_f64() {
                    Some(value) => Ok(Some(value)),
                    None => Err(Rejection::Malformed),
                },
                None => Ok(None),
            }
        };

        let integer = |key: &str| -> Result<Option<i64>, Rejection> {
            match scalar(key) {
                Some(value) => match value.as_i64() {
                    Some(value) => Ok(Some(value)),
                    None => Err(Rejection::Malformed),
                },
                None => Ok(None),
            }
        };

        let text = |key: &str| -> Option<String> {
            match scalar(key)? {
                Scalar::Text(text) => Some(text),
                Scalar::Integer(value) => Some(format!("{:02}", value)),
                _ => None,
            }
        };

        let timestamp_ms = integer("timestamp_ms")
            .map_err(|_| Rejection::Timestamp)?
            .ok_or(Rejection::Timestamp)?;

        Ok(Self {
            timestamp_ms,
            latitude: float("latitude")?,
            longitude: float("longitude")?,
            altitude: float("altitude")?,
            speed: float("speed")?,
            course: float("course")?,
            hdop: float("hdop")?,
            pdop: float("pdop")?,
            num_satellites: integer("num_satellites")?,
            quality: integer("quality")?,
            satellite_system: text("satellite_system"),
            satellite_number: text("satellite_number"),
            pseudorange: float("pseudorange")?,
            carrier_phase: float("carrier_phase")?,
            doppler: float("doppler")?,
            signal_strength: float("signal_strength")?,
        })
    }
}
