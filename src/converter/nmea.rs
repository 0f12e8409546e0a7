//! NMEA sentence stream decoder
use std::collections::BTreeMap;

use log::{debug, trace};

use crate::{
    error::ConversionError,
    input::RawInput,
    record::{CanonicalRecord, Scalar},
    settings::ConverterSettings,
    utils::{
        Date, is_plausible_ms, nmea_checksum, parse_date, parse_time_of_day, utc_unix_ms,
    },
};

/// Field interpretation
#[derive(Debug, Copy, Clone, PartialEq)]
enum Kind {
    Text,
    Integer,
    Float,
    /// hhmmss.ss, stored as HH:MM:SS
    Time,
    /// ddmmyy, stored as YYYY-MM-DD
    Date,
    /// (d)ddmm.mmmm, stored verbatim
    Coordinate,
}

const GGA: &[(&str, Kind)] = &[
    ("timestamp", Kind::Time),
    ("lat", Kind::Coordinate),
    ("lat_dir", Kind::Text),
    ("lon", Kind::Coordinate),
    ("lon_dir", Kind::Text),
    ("gps_qual", Kind::Integer),
    ("num_sats", Kind::Integer),
    ("horizontal_dil", Kind::Float),
    ("altitude", Kind::Float),
    ("altitude_units", Kind::Text),
    ("geo_sep", Kind::Float),
    ("geo_sep_units", Kind::Text),
    ("age_gps_data", Kind::Float),
    ("ref_station_id", Kind::Text),
];

const RMC: &[(&str, Kind)] = &[
    ("timestamp", Kind::Time),
    ("status", Kind::Text),
    ("lat", Kind::Coordinate),
    ("lat_dir", Kind::Text),
    ("lon", Kind::Coordinate),
    ("lon_dir", Kind::Text),
    ("spd_over_grnd", Kind::Float),
    ("true_course", Kind::Float),
    ("datestamp", Kind::Date),
    ("mag_variation", Kind::Float),
    ("mag_var_dir", Kind::Text),
    ("mode_indicator", Kind::Text),
];

const GSA: &[(&str, Kind)] = &[
    ("mode", Kind::Text),
    ("mode_fix_type", Kind::Integer),
    ("sv_id01", Kind::Text),
    ("sv_id02", Kind::Text),
    ("sv_id03", Kind::Text),
    ("sv_id04", Kind::Text),
    ("sv_id05", Kind::Text),
    ("sv_id06", Kind::Text),
    ("sv_id07", Kind::Text),
    ("sv_id08", Kind::Text),
    ("sv_id09", Kind::Text),
    ("sv_id10", Kind::Text),
    ("sv_id11", Kind::Text),
    ("sv_id12", Kind::Text),
    ("pdop", Kind::Float),
    ("hdop", Kind::Float),
    ("vdop", Kind::Float),
];

const GNS: &[(&str, Kind)] = &[
    ("timestamp", Kind::Time),
    ("lat", Kind::Coordinate),
    ("lat_dir", Kind::Text),
    ("lon", Kind::Coordinate),
    ("lon_dir", Kind::Text),
    ("mode_indicator", Kind::Text),
    ("num_sats", Kind::Integer),
    ("hdop", Kind::Float),
    ("altitude", Kind::Float),
    ("geo_sep", Kind::Float),
    ("age_gps_data", Kind::Float),
    ("differential_ref", Kind::Text),
];

fn layout(sentence_type: &str) -> Option<&'static [(&'static str, Kind)]> {
    match sentence_type {
        "GGA" => Some(GGA),
        "RMC" => Some(RMC),
        "GSA" => Some(GSA),
        "GNS" => Some(GNS),
        _ => None,
    }
}

/// Reason why a line did not produce a record
#[derive(Debug, Clone, PartialEq)]
pub enum LineError {
    Empty,
    NotASentence,
    Checksum,
    Field(&'static str),
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty line"),
            Self::NotASentence => write!(f, "not an NMEA sentence"),
            Self::Checksum => write!(f, "checksum error"),
            Self::Field(name) => write!(f, "invalid \"{}\" field", name),
        }
    }
}

/// Decoding statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// Non empty lines
    pub lines: usize,

    /// Lines that produced a record
    pub parsed: usize,

    /// Lines that were ignored
    pub rejected: usize,

    /// Records per sentence type
    pub per_type: BTreeMap<String, usize>,
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} lines, {} parsed, {} rejected",
            self.lines, self.parsed, self.rejected
        )?;
        for (sentence_type, count) in self.per_type.iter() {
            write!(f, ", {}: {}", sentence_type, count)?;
        }
        Ok(())
    }
}

/// Splits a trailing `,<digits>` millisecond timestamp, when present.
pub fn split_trailing_timestamp(line: &str, min_digits: usize) -> (&str, Option<i64>) {
    if let Some((head, tail)) = line.rsplit_once(',') {
        if is_plausible_ms(tail, min_digits) {
            if let Ok(timestamp) = tail.trim().parse::<i64>() {
                return (head.trim_end(), Some(timestamp));
            }
        }
    }
    (line, None)
}

fn parse_field(raw: &str, kind: Kind) -> Option<Scalar> {
    let raw = raw.trim();

    if raw.is_empty() {
        return Some(Scalar::Null);
    }

    match kind {
        Kind::Text => Some(Scalar::Text(raw.to_string())),
        Kind::Integer => raw.parse::<i64>().ok().map(Scalar::Integer),
        Kind::Float => raw.parse::<f64>().ok().map(Scalar::Float),
        Kind::Time => parse_time_of_day(raw).map(|t| Scalar::Text(t.to_string())),
        Kind::Date => parse_date(raw).map(|d| Scalar::Text(d.to_string())),
        Kind::Coordinate => {
            if raw.parse::<f64>().is_ok() {
                Some(Scalar::Text(raw.to_string()))
            } else {
                None
            }
        },
    }
}

/// Line by line NMEA decoder
#[derive(Debug, Clone)]
pub struct Decoder {
    /// Minimal trailing timestamp width
    min_digits: usize,

    /// Latest RMC date
    date: Option<Date>,

    stats: Stats,
}

impl Decoder {
    pub fn new(min_digits: usize) -> Self {
        Self {
            min_digits,
            date: None,
            stats: Default::default(),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Decodes all lines. Lines that fail to parse are counted and ignored.
    pub fn decode(&mut self, text: &str) -> Vec<CanonicalRecord> {
        let mut records = Vec::new();

        for (nth, line) in text.lines().enumerate() {
            match self.decode_line(line) {
                Ok(record) => {
                    self.stats.parsed += 1;
                    if let Some(sentence_type) = &record.sentence_type {
                        *self.stats.per_type.entry(sentence_type.clone()).or_default() += 1;
                    }
                    records.push(record);
                },
                Err(LineError::Empty) => {},
                Err(e) => {
                    trace!("line #{} - {}", nth + 1, e);
                    self.stats.rejected += 1;
                },
            }
        }

        records
    }

    /// Decodes a single line
    pub fn decode_line(&mut self, line: &str) -> Result<CanonicalRecord, LineError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(LineError::Empty);
        }

        self.stats.lines += 1;

        let (sentence, timestamp_ms) = split_trailing_timestamp(line, self.min_digits);

        let content = sentence.strip_prefix('$').ok_or(LineError::NotASentence)?;

        let body = match content.split_once('*') {
            Some((body, checksum)) => {
                let expected =
                    u8::from_str_radix(checksum.trim(), 16).map_err(|_| LineError::Checksum)?;
                if nmea_checksum(body) != expected {
                    return Err(LineError::Checksum);
                }
                body
            },
            None => content,
        };

        let mut items = body.split(',');
        let address = items.next().unwrap_or_default();

        if address.len() < 3 || !address.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LineError::NotASentence);
        }

        // proprietary sentences have no talker
        let (talker, sentence_type) = if address.len() == 5 && !address.starts_with('P') {
            (Some(&address[..2]), &address[2..])
        } else {
            (None, address)
        };

        let values = items.collect::<Vec<_>>();

        let mut record = CanonicalRecord::new(timestamp_ms, Some(sentence_type));

        if let Some(talker) = talker {
            record.set("talker", Scalar::Text(talker.to_string()));
        }

        match layout(sentence_type) {
            Some(layout) => {
                for ((name, kind), raw) in layout.iter().zip(values.iter()) {
                    let value = parse_field(raw, *kind).ok_or(LineError::Field(*name))?;
                    record.set(name, value);
                }
            },
            None => {
                for (nth, raw) in values.iter().enumerate() {
                    let value = parse_field(raw, Kind::Text).unwrap_or(Scalar::Null);
                    record.set(&format!("f{}", nth + 1), value);
                }
            },
        }

        let time = values.first().and_then(|t| parse_time_of_day(t));

        if sentence_type == "RMC" {
            if let Some(date) = values.get(8).and_then(|d| parse_date(d)) {
                self.date = Some(date);
            }
        }

        if record.timestamp_ms.is_none() && matches!(sentence_type, "RMC" | "GGA" | "GNS") {
            if let (Some(date), Some(time)) = (self.date, time) {
                record.timestamp_ms = utc_unix_ms(date, time);
            }
        }

        Ok(record)
    }
}

/// Decodes an NMEA [RawInput]
pub fn decode(
    input: &RawInput,
    settings: &ConverterSettings,
) -> Result<Vec<CanonicalRecord>, ConversionError> {
    let text = input.text(&settings.encodings)?;

    let mut decoder = Decoder::new(settings.min_timestamp_digits);
    let records = decoder.decode(&text);

    debug!("{} - {}", input.filename(), decoder.stats());
    Ok(records)
}

#[cfg(test)]
mod test {
    use super::{Decoder, LineError, split_trailing_timestamp};
    use crate::record::Scalar;

    const GGA: &str =
        "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47,1700000000000";

    #[test]
    fn test_trailing_timestamp() {
        let (sentence, ts) = split_trailing_timestamp(GGA, 13);
        assert_eq!(ts, Some(1_700_000_000_000));
        assert!(sentence.ends_with("*47"));

        let (sentence, ts) = split_trailing_timestamp("$GPGGA,123519*47,17000", 13);
        assert_eq!(ts, None);
        assert_eq!(sentence, "$GPGGA,123519*47,17000");
    }

    #[test]
    fn test_gga() {
        let mut decoder = Decoder::new(13);
        let record = decoder.decode_line(GGA).unwrap();

        assert_eq!(record.timestamp_ms, Some(1_700_000_000_000));
        assert_eq!(record.sentence_type.as_deref(), Some("GGA"));
        assert_eq!(record.get("talker"), Some(&Scalar::Text("GP".to_string())));
        assert_eq!(
            record.get("timestamp"),
            Some(&Scalar::Text("12:35:19".to_string()))
        );
        assert_eq!(
            record.get("lat"),
            Some(&Scalar::Text("4807.038".to_string()))
        );
        assert_eq!(
            record.get("lon"),
            Some(&Scalar::Text("01131.000".to_string()))
        );
        assert_eq!(record.get("gps_qual"), Some(&Scalar::Integer(1)));
        assert_eq!(record.get("num_sats"), Some(&Scalar::Integer(8)));
        assert_eq!(record.get("horizontal_dil"), Some(&Scalar::Float(0.9)));
        assert_eq!(record.get("altitude"), Some(&Scalar::Float(545.4)));
        assert_eq!(record.get("age_gps_data"), Some(&Scalar::Null));
    }

    #[test]
    fn test_date_latch() {
        let content = "\
$GPGGA,221321,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*4B
$GPRMC,221320,A,4807.038,N,01131.000,E,022.4,084.4,141123,003.1,W*6C
$GPGGA,221321,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*4B
";
        let mut decoder = Decoder::new(13);
        let records = decoder.decode(content);
        assert_eq!(records.len(), 3);

        // no date known yet
        assert_eq!(records[0].timestamp_ms, None);

        assert_eq!(records[1].timestamp_ms, Some(1_700_000_000_000));
        assert_eq!(
            records[1].get("datestamp"),
            Some(&Scalar::Text("2023-11-14".to_string()))
        );
        assert_eq!(records[2].timestamp_ms, Some(1_700_000_001_000));
    }

    #[test]
    fn test_rejections() {
        let mut decoder = Decoder::new(13);

        assert_eq!(decoder.decode_line("   "), Err(LineError::Empty));
        assert_eq!(
            decoder.decode_line("hello world"),
            Err(LineError::NotASentence)
        );
        assert_eq!(
            decoder.decode_line(
                "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*48"
            ),
            Err(LineError::Checksum)
        );
        assert_eq!(
            decoder.decode_line(
                "$GPGGA,221321,ab07.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*44"
            ),
            Err(LineError::Field("lat"))
        );
        assert_eq!(
            decoder.decode_line("$GPGGA,123519,4807.038,N,01131.000,E,one"),
            Err(LineError::Field("gps_qual"))
        );
    }

    #[test]
    fn test_generic_sentences() {
        let mut decoder = Decoder::new(13);
        let record = decoder
            .decode_line(
                "$GPGSV,2,1,08,01,40,083,46,02,17,308,41,12,07,344,39,14,22,228,45*75,1700000000000",
            )
            .unwrap();

        assert_eq!(record.sentence_type.as_deref(), Some("GSV"));
        assert_eq!(record.get("f1"), Some(&Scalar::Text("2".to_string())));
        assert_eq!(record.get("f19"), Some(&Scalar::Text("45".to_string())));

        let record = decoder.decode_line("$PUBX,00,081350.00").unwrap();
        assert_eq!(record.sentence_type.as_deref(), Some("PUBX"));
        assert!(record.get("talker").is_none());
    }

    #[test]
    fn test_gsa_and_gns() {
        let mut decoder = Decoder::new(13);

        let record = decoder
            .decode_line("$GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1*39")
            .unwrap();
        assert_eq!(record.get("pdop"), Some(&Scalar::Float(2.5)));
        assert_eq!(record.get("sv_id03"), Some(&Scalar::Null));

        let record = decoder
            .decode_line("$GNGNS,014035.00,4332.69262,S,17235.48549,E,RR,13,0.9,25.63,11.24,,*70")
            .unwrap();
        assert_eq!(record.sentence_type.as_deref(), Some("GNS"));
        assert_eq!(record.get("talker"), Some(&Scalar::Text("GN".to_string())));
        assert_eq!(record.get("num_sats"), Some(&Scalar::Integer(13)));
    }

    #[test]
    fn test_statistics() {
        let content = format!("{}\n\ngarbage\n{}\n", GGA, GGA);
        let mut decoder = Decoder::new(13);
        let records = decoder.decode(&content);

        assert_eq!(records.len(), 2);
        assert_eq!(decoder.stats().lines, 3);
        assert_eq!(decoder.stats().parsed, 2);
        assert_eq!(decoder.stats().rejected, 1);
        assert_eq!(decoder.stats().per_type.get("GGA"), Some(&2));
    }
}
