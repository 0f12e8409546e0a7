//! Coordinate & record utilities, all pure functions.
use hifitime::prelude::Epoch;

/// Knots to meters per second
pub const KNOTS_TO_MPS: f64 = 0.514444;

/// Coordinate axis, which defines the width of the degrees prefix
/// in NMEA sexagesimal fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Axis {
    Latitude,
    Longitude,
}

impl Axis {
    fn degrees_width(&self) -> usize {
        match self {
            Self::Latitude => 2,
            Self::Longitude => 3,
        }
    }

    fn negative_hemisphere(&self) -> &'static str {
        match self {
            Self::Latitude => "S",
            Self::Longitude => "W",
        }
    }

    fn positive_hemisphere(&self) -> &'static str {
        match self {
            Self::Latitude => "N",
            Self::Longitude => "E",
        }
    }
}

/// Converts NMEA (D)DDMM.MMMM + hemisphere letter to decimal degrees.
/// Degrees are the fixed-width integer prefix, minutes the remainder.
/// Returns None on malformed fields or unexpected hemisphere.
pub fn nmea_to_decimal(value: &str, hemisphere: &str, axis: Axis) -> Option<f64> {
    let value = value.trim();
    let hemisphere = hemisphere.trim();
    let width = axis.degrees_width();

    if value.len() <= width || !value.is_char_boundary(width) {
        return None;
    }

    let (degrees, minutes) = value.split_at(width);

    if !degrees.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let degrees = degrees.parse::<f64>().ok()?;
    let minutes = minutes.parse::<f64>().ok()?;

    if !minutes.is_finite() || !(0.0..60.0).contains(&minutes) {
        return None;
    }

    with_hemisphere(degrees + minutes / 60.0, hemisphere, axis)
}

/// Converts NMEA (D)DDMM.MMMM, already parsed as a float, to decimal degrees.
pub fn nmea_float_to_decimal(value: f64, hemisphere: &str, axis: Axis) -> Option<f64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    let degrees = (value / 100.0).trunc();
    let minutes = value - degrees * 100.0;

    if !(0.0..60.0).contains(&minutes) {
        return None;
    }

    with_hemisphere(degrees + minutes / 60.0, hemisphere.trim(), axis)
}

fn with_hemisphere(decimal: f64, hemisphere: &str, axis: Axis) -> Option<f64> {
    if hemisphere.eq_ignore_ascii_case(axis.negative_hemisphere()) {
        Some(-decimal)
    } else if hemisphere.eq_ignore_ascii_case(axis.positive_hemisphere()) {
        Some(decimal)
    } else {
        None
    }
}

/// Speed over ground conversion
pub fn knots_to_mps(knots: f64) -> f64 {
    knots * KNOTS_TO_MPS
}

/// NMEA time of day, as (hours, minutes, seconds, nanoseconds)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub nanos: u32,
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)?;
        if self.nanos > 0 {
            write!(f, ".{:03}", self.nanos / 1_000_000)?;
        }
        Ok(())
    }
}

/// Parses NMEA hhmmss(.sss) field
pub fn parse_time_of_day(field: &str) -> Option<TimeOfDay> {
    let field = field.trim();
    let (integer, fraction) = match field.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (field, ""),
    };

    if integer.len() != 6 || !integer.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hours = integer[0..2].parse::<u8>().ok()?;
    let minutes = integer[2..4].parse::<u8>().ok()?;
    let seconds = integer[4..6].parse::<u8>().ok()?;

    if hours > 23 || minutes > 59 || seconds > 60 {
        return None;
    }

    let nanos = if fraction.is_empty() {
        0
    } else {
        if !fraction.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let digits = &fraction[..fraction.len().min(9)];
        let scale = 10_u32.pow(9 - digits.len() as u32);
        digits.parse::<u32>().ok()? * scale
    };

    Some(TimeOfDay {
        hours,
        minutes,
        seconds,
        nanos,
    })
}

/// Calendar date
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Date {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl std::fmt::Display for Date {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Parses NMEA ddmmyy field. Two digit years are pivoted on 1980,
/// start of the GPS timescale.
pub fn parse_date(field: &str) -> Option<Date> {
    let field = field.trim();
    if field.len() != 6 || !field.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let day = field[0..2].parse::<u8>().ok()?;
    let month = field[2..4].parse::<u8>().ok()?;
    let yy = field[4..6].parse::<i32>().ok()?;

    if day == 0 || day > 31 || month == 0 || month > 12 {
        return None;
    }

    let year = if yy >= 80 { 1900 + yy } else { 2000 + yy };

    Some(Date { year, month, day })
}

/// UNIX milliseconds of a UTC date and time of day
pub fn utc_unix_ms(date: Date, time: TimeOfDay) -> Option<i64> {
    let epoch = Epoch::maybe_from_gregorian_utc(
        date.year,
        date.month,
        date.day,
        time.hours,
        time.minutes,
        time.seconds,
        time.nanos,
    )
    .ok()?;

    Some(epoch.to_unix_milliseconds().round() as i64)
}

/// UNIX milliseconds of any [Epoch], whatever its timescale
pub fn epoch_unix_ms(epoch: Epoch) -> i64 {
    epoch.to_unix_milliseconds().round() as i64
}

/// ISO-8601 (UTC) rendition of an [Epoch], with millisecond
/// resolution when needed.
pub fn to_iso8601(epoch: Epoch) -> String {
    let (y, m, d, hh, mm, ss, nanos) = epoch.to_gregorian_utc();

    let date = Date {
        year: y,
        month: m,
        day: d,
    };

    let time = TimeOfDay {
        hours: hh,
        minutes: mm,
        seconds: ss,
        nanos,
    };

    format!("{}T{}", date, time)
}

/// Inclusive range validator
pub fn in_range(value: f64, (min, max): (f64, f64)) -> bool {
    value.is_finite() && value >= min && value <= max
}

/// True if this token looks like a millisecond UNIX timestamp
pub fn is_plausible_ms(token: &str, min_digits: usize) -> bool {
    let token = token.trim();
    token.len() >= min_digits && token.chars().all(|c| c.is_ascii_digit())
}

/// XOR checksum of an NMEA sentence body (between '$' and '*')
pub fn nmea_checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}
