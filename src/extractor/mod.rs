//! Location extractor
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use itertools::Itertools;
use log::{debug, trace};

use crate::{
    converter::discard,
    error::ExtractionError,
    record::{
        CanonicalRecord, Scalar, write_jsonl,
        location::{Bounds, LocationRecord, Rejection},
    },
    utils::{Axis, knots_to_mps, nmea_float_to_decimal, nmea_to_decimal},
};

/// Reads a canonical artifact. Lines that are not JSON objects are skipped.
pub fn read_canonical(path: &Path) -> Result<Vec<CanonicalRecord>, ExtractionError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (nth, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<serde_json::Value>(line)
            .map_err(|e| e.to_string())
            .and_then(|value| CanonicalRecord::try_from(&value))
        {
            Ok(record) => records.push(record),
            Err(e) => trace!("{}:{} - {}", path.display(), nth + 1, e),
        }
    }

    Ok(records)
}

/// Decimal coordinate from a decimal field, or from NMEA (d)ddmm.mmmm
/// and hemisphere fields.
fn coordinate(
    record: &CanonicalRecord,
    decimal: &str,
    sexagesimal: &str,
    hemisphere: &str,
    axis: Axis,
) -> Option<f64> {
    if let Some(value) = record.get_any(&[decimal]).and_then(|v| v.as_f64()) {
        return Some(value);
    }

    let value = record.get_any(&[sexagesimal])?;
    let hemisphere = record.get_any(&[hemisphere])?.as_str()?;

    match value {
        Scalar::Text(text) => nmea_to_decimal(text, hemisphere, axis),
        other => nmea_float_to_decimal(other.as_f64()?, hemisphere, axis),
    }
}

fn float(record: &CanonicalRecord, keys: &[&str]) -> Option<f64> {
    record.get_any(keys).and_then(|v| v.as_f64())
}

fn integer(record: &CanonicalRecord, keys: &[&str]) -> Option<i64> {
    record.get_any(keys).and_then(|v| v.as_i64())
}

/// Preferred observable of one kind: band 1, otherwise the lowest code
fn observable(record: &CanonicalRecord, kinds: &[char]) -> Option<f64> {
    let candidates = record
        .fields()
        .filter(|(key, _)| {
            let mut chars = key.chars();
            match (chars.next(), chars.next(), chars.next()) {
                (Some(kind), Some(band), None) => kinds.contains(&kind) && band.is_ascii_digit(),
                _ => false,
            }
        })
        .filter_map(|(key, value)| Some((key, value.as_f64()?)))
        .sorted_by(|(a, _), (b, _)| {
            let (a, b): (&str, &str) = (a, b);
            (!a.ends_with('1'))
                .cmp(&!b.ends_with('1'))
                .then(a.cmp(b))
        })
        .collect::<Vec<_>>();

    candidates.first().map(|(_, value)| *value)
}

/// Location record of a positioning (GGA, GNS) sentence
fn position_fix(record: &CanonicalRecord, timestamp_ms: i64) -> LocationRecord {
    LocationRecord {
        timestamp_ms,
        latitude: coordinate(record, "latitude", "lat", "lat_dir", Axis::Latitude),
        longitude: coordinate(record, "longitude", "lon", "lon_dir", Axis::Longitude),
        altitude: float(record, &["altitude"]),
        num_satellites: integer(record, &["num_sats", "num_satellites"]),
        hdop: float(record, &["horizontal_dil", "hdop"]),
        pdop: float(record, &["pdop"]),
        quality: integer(record, &["gps_qual", "quality"]),
        ..Default::default()
    }
}

/// Location record of a course (RMC) sentence
fn course_fix(record: &CanonicalRecord, timestamp_ms: i64) -> LocationRecord {
    let speed = match float(record, &["spd_over_grnd"]) {
        Some(knots) => Some(knots_to_mps(knots)),
        None => float(record, &["speed"]),
    };

    LocationRecord {
        timestamp_ms,
        latitude: coordinate(record, "latitude", "lat", "lat_dir", Axis::Latitude),
        longitude: coordinate(record, "longitude", "lon", "lon_dir", Axis::Longitude),
        speed,
        course: float(record, &["true_course", "course"]),
        ..Default::default()
    }
}

/// Location record of a satellite observation
fn observation(record: &CanonicalRecord, timestamp_ms: i64) -> LocationRecord {
    let text = |keys: &[&str]| -> Option<String> {
        match record.get_any(keys)? {
            Scalar::Text(text) => Some(text.trim().to_string()),
            Scalar::Integer(value) => Some(format!("{:02}", value)),
            _ => None,
        }
    };

    let sv = text(&["sv"]);

    let satellite_system = text(&["satellite_system"]).or_else(|| {
        sv.as_ref()
            .and_then(|sv| sv.get(..1))
            .map(|s| s.to_string())
    });

    let satellite_number = text(&["satellite_number"])
        .or_else(|| sv.as_ref().and_then(|sv| sv.get(1..)).map(|s| s.to_string()));

    LocationRecord {
        timestamp_ms,
        satellite_system,
        satellite_number,
        pseudorange: float(record, &["pseudorange"]).or_else(|| observable(record, &['C', 'P'])),
        carrier_phase: float(record, &["carrier_phase"]).or_else(|| observable(record, &['L'])),
        doppler: float(record, &["doppler"]).or_else(|| observable(record, &['D'])),
        signal_strength: float(record, &["signal_strength"])
            .or_else(|| observable(record, &['S'])),
        ..Default::default()
    }
}

/// Any other record: every alias is attempted
fn generic(record: &CanonicalRecord, timestamp_ms: i64) -> LocationRecord {
    let mut location = position_fix(record, timestamp_ms);
    let course = course_fix(record, timestamp_ms);
    location.speed = course.speed;
    location.course = course.course;
    location
}

fn is_satellite(record: &CanonicalRecord) -> bool {
    record.get_any(&["satellite_system", "sv"]).is_some()
}

/// Extraction summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub produced: usize,
    pub skipped: usize,
    pub rejected: BTreeMap<Rejection, usize>,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} produced, {} skipped", self.produced, self.skipped)?;
        for (reason, count) in self.rejected.iter() {
            write!(f, ", {}: {}", reason, count)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extractor {
    bounds: Bounds,
}

impl Extractor {
    pub fn new(bounds: Bounds) -> Self {
        Self { bounds }
    }

    /// Location candidate of a [CanonicalRecord], None when the record
    /// cannot carry a position (GSA, GSV..).
    pub fn candidate(&self, record: &CanonicalRecord) -> Option<LocationRecord> {
        let timestamp_ms = record.timestamp_ms.unwrap_or_default();

        match record.sentence_type.as_deref() {
            Some("GGA") | Some("GNS") => Some(position_fix(record, timestamp_ms)),
            Some("RMC") => Some(course_fix(record, timestamp_ms)),
            Some(_) => None,
            None => {
                if is_satellite(record) {
                    Some(observation(record, timestamp_ms))
                } else {
                    Some(generic(record, timestamp_ms))
                }
            },
        }
    }

    /// Filters valid [LocationRecord]s, in input order.
    pub fn filter(&self, records: &[CanonicalRecord]) -> (Vec<LocationRecord>, Summary) {
        let mut summary = Summary::default();
        let mut locations = Vec::with_capacity(records.len());

        for record in records {
            match self.candidate(record) {
                Some(location) => match location.validate(&self.bounds) {
                    Ok(_) => locations.push(location),
                    Err(rejection) => {
                        *summary.rejected.entry(rejection).or_default() += 1;
                    },
                },
                None => summary.skipped += 1,
            }
        }

        summary.produced = locations.len();
        (locations, summary)
    }

    /// Extracts valid [LocationRecord]s to `output`.
    /// Fails when not a single valid record was produced.
    pub fn extract(
        &self,
        records: &[CanonicalRecord],
        output: &Path,
    ) -> Result<Vec<LocationRecord>, ExtractionError> {
        let (locations, summary) = self.filter(records);

        debug!("{} - {}", output.display(), summary);

        if locations.is_empty() {
            return Err(ExtractionError::NoValidRecords {
                total: records.len(),
                rejected: summary.rejected.values().sum::<usize>(),
            });
        }

        if let Err(e) = write_jsonl(output, &locations) {
            discard(output);
            return Err(e.into());
        }

        Ok(locations)
    }
}

#[cfg(test)]
mod test {
    use super::{Extractor, read_canonical};
    use crate::{
        error::ExtractionError,
        record::{CanonicalRecord, Rejection, Scalar},
    };

    fn gga(lat_dir: &str, lon_dir: &str, altitude: f64) -> CanonicalRecord {
        let mut record = CanonicalRecord::new(Some(1_700_000_000_000), Some("GGA"));
        record.set("lat", Scalar::Text("4807.038".to_string()));
        record.set("lat_dir", Scalar::Text(lat_dir.to_string()));
        record.set("lon", Scalar::Text("01131.000".to_string()));
        record.set("lon_dir", Scalar::Text(lon_dir.to_string()));
        record.set("gps_qual", Scalar::Integer(1));
        record.set("num_sats", Scalar::Integer(8));
        record.set("horizontal_dil", Scalar::Float(0.9));
        record.set("altitude", Scalar::Float(altitude));
        record
    }

    #[test]
    fn test_gga() {
        let extractor = Extractor::default();
        let (locations, summary) = extractor.filter(&[gga("N", "E", 545.4)]);

        assert_eq!(summary.produced, 1);
        let location = &locations[0];
        assert_eq!(location.timestamp_ms, 1_700_000_000_000);
        assert!((location.latitude.unwrap() - 48.1173).abs() < 1.0E-4);
        assert!((location.longitude.unwrap() - 11.5167).abs() < 1.0E-4);
        assert_eq!(location.altitude, Some(545.4));
        assert_eq!(location.num_satellites, Some(8));
        assert_eq!(location.hdop, Some(0.9));
        assert_eq!(location.quality, Some(1));
    }

    #[test]
    fn test_numerical_coordinates() {
        let mut record = CanonicalRecord::new(Some(1_700_000_000_000), Some("GGA"));
        record.set("lat", Scalar::Float(2218.12345));
        record.set("lat_dir", Scalar::Text("N".to_string()));
        record.set("lon", Scalar::Float(11407.54321));
        record.set("lon_dir", Scalar::Text("W".to_string()));

        let (locations, _) = Extractor::default().filter(&[record]);

        let expected = 22.0 + 18.12345 / 60.0;
        assert!((locations[0].latitude.unwrap() - expected).abs() < 1.0E-9);

        let expected = -(114.0 + 7.54321 / 60.0);
        assert!((locations[0].longitude.unwrap() - expected).abs() < 1.0E-9);
    }

    #[test]
    fn test_hemispheres() {
        let extractor = Extractor::default();

        let (locations, _) = extractor.filter(&[gga("S", "W", 545.4)]);
        assert!(locations[0].latitude.unwrap() < 0.0);
        assert!(locations[0].longitude.unwrap() < 0.0);

        let (locations, _) = extractor.filter(&[gga("N", "E", 545.4)]);
        assert!(locations[0].latitude.unwrap() >= 0.0);
        assert!(locations[0].longitude.unwrap() >= 0.0);
    }

    #[test]
    fn test_altitude_rejection() {
        let extractor = Extractor::default();

        let (locations, summary) =
            extractor.filter(&[gga("N", "E", 15000.0), gga("N", "E", 545.4)]);

        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].altitude, Some(545.4));
        assert_eq!(
            summary.rejected.get(&Rejection::OutOfBounds("altitude")),
            Some(&1)
        );
    }

    #[test]
    fn test_rmc() {
        let mut record = CanonicalRecord::new(Some(1_700_000_000_000), Some("RMC"));
        record.set("lat", Scalar::Text("4807.038".to_string()));
        record.set("lat_dir", Scalar::Text("N".to_string()));
        record.set("lon", Scalar::Text("01131.000".to_string()));
        record.set("lon_dir", Scalar::Text("E".to_string()));
        record.set("spd_over_grnd", Scalar::Float(22.4));
        record.set("true_course", Scalar::Float(84.4));

        let (locations, _) = Extractor::default().filter(&[record]);
        let location = &locations[0];
        assert!((location.speed.unwrap() - 11.523_545_6).abs() < 1.0E-6);
        assert_eq!(location.course, Some(84.4));
        assert!(location.altitude.is_none());
    }

    #[test]
    fn test_satellite_observables() {
        let mut record = CanonicalRecord::new(Some(1_700_000_000_000), None);
        record.set("sv", Scalar::Text("G01".to_string()));
        record.set("satellite_system", Scalar::Text("G".to_string()));
        record.set("satellite_number", Scalar::Text("01".to_string()));
        record.set("C2", Scalar::Float(20_000_100.0));
        record.set("C1", Scalar::Float(20_000_000.0));
        record.set("L2", Scalar::Float(110_000_000.0));
        record.set("S1", Scalar::Float(45.0));

        let (locations, _) = Extractor::default().filter(&[record]);
        let location = &locations[0];
        assert_eq!(location.satellite_system.as_deref(), Some("G"));
        assert_eq!(location.satellite_number.as_deref(), Some("01"));
        assert_eq!(location.pseudorange, Some(20_000_000.0));
        assert_eq!(location.carrier_phase, Some(110_000_000.0));
        assert_eq!(location.signal_strength, Some(45.0));
        assert!(location.doppler.is_none());
        assert!(location.latitude.is_none());
    }

    #[test]
    fn test_aliases() {
        let mut record = CanonicalRecord::new(Some(1_700_000_000_000), None);
        record.set("latitude", Scalar::Float(-33.5));
        record.set("longitude", Scalar::Text("151.2".to_string()));
        record.set("num_satellites", Scalar::Integer(12));
        record.set("speed", Scalar::Float(3.0));

        let (locations, _) = Extractor::default().filter(&[record]);
        let location = &locations[0];
        assert_eq!(location.latitude, Some(-33.5));
        assert_eq!(location.longitude, Some(151.2));
        assert_eq!(location.num_satellites, Some(12));
        assert_eq!(location.speed, Some(3.0));

        let mut record = CanonicalRecord::new(Some(1_700_000_000_000), Some("GGA"));
        record.set("lat", Scalar::Float(4807.038));
        record.set("lat_dir", Scalar::Text("N".to_string()));
        record.set("lon", Scalar::Float(1131.0));
        record.set("lon_dir", Scalar::Text("W".to_string()));

        let (locations, _) = Extractor::default().filter(&[record]);
        assert!((locations[0].latitude.unwrap() - 48.1173).abs() < 1.0E-4);
        assert!((locations[0].longitude.unwrap() + 11.5167).abs() < 1.0E-4);
    }

    #[test]
    fn test_skipped_sentences() {
        let mut record = CanonicalRecord::new(Some(1_700_000_000_000), Some("GSA"));
        record.set("pdop", Scalar::Float(2.5));

        let (locations, summary) = Extractor::default().filter(&[record]);
        assert!(locations.is_empty());
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_extraction_failure() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("test.location.jsonl");

        match Extractor::default().extract(&[gga("N", "E", 15000.0)], &output) {
            Err(ExtractionError::NoValidRecords { total, rejected }) => {
                assert_eq!(total, 1);
                assert_eq!(rejected, 1);
            },
            other => panic!("unexpected {:?}", other),
        }
        assert!(!output.exists());
    }

    #[test]
    fn test_idempotence() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.location.jsonl");
        let second = dir.path().join("second.location.jsonl");

        let records = vec![gga("N", "E", 545.4), gga("S", "W", 12.0)];
        let extractor = Extractor::default();

        extractor.extract(&records, &first).unwrap();
        extractor.extract(&records, &second).unwrap();

        assert_eq!(
            std::fs::read(&first).unwrap(),
            std::fs::read(&second).unwrap()
        );
    }

    #[test]
    fn test_read_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.jsonl");
        std::fs::write(
            &path,
            "{\"timestamp_ms\":1700000000000,\"sentence_type\":\"GGA\"}\nnot json\n\n[1]\n",
        )
        .unwrap();

        let records = read_canonical(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sentence_type.as_deref(), Some("GGA"));
    }
}
