//! Field-level conversions shared by the HQ and NMEA decoders.

use chrono::{DateTime, NaiveDate, Utc};

pub const KNOTS_TO_KPH: f64 = 1.852;

/// Converts a degrees-minutes value such as `3612.8854` or `08140.0735` to
/// decimal degrees. The last two integer digits and the fraction are minutes,
/// everything before them is degrees. `S` and `W` negate the result.
pub fn dm_to_decimal(dm: &str, hemisphere: &str) -> Option<f64> {
    let dm = dm.trim();
    let dot = dm.find('.')?;
    if dot < 3 {
        return None;
    }
    let (degrees, minutes) = dm.split_at(dot - 2);
    if !degrees.bytes().all(|b| b.is_ascii_digit())
        || !minutes.bytes().all(|b| b.is_ascii_digit() || b == b'.')
    {
        return None;
    }

    let degrees = degrees.parse::<u32>().ok()? as f64;
    let minutes = minutes.parse::<f64>().ok()?;
    let mut decimal = degrees + minutes / 60.0;
    if !decimal.is_finite() {
        return None;
    }
    if matches!(hemisphere.trim(), "S" | "W") {
        decimal = -decimal;
    }
    Some(decimal)
}

/// Combines `hhmmss` and `ddmmyy` (UTC, year 2000+yy) into an instant.
/// Returns `None` unless both are six digits forming a real date and time.
pub fn utc_timestamp(hhmmss: &str, ddmmyy: &str) -> Option<DateTime<Utc>> {
    let time = six_digits(hhmmss)?;
    let date = six_digits(ddmmyy)?;

    NaiveDate::from_ymd_opt(2000 + date[2] as i32, date[1], date[0])?
        .and_hms_opt(time[0], time[1], time[2])
        .map(|naive| naive.and_utc())
}

fn six_digits(field: &str) -> Option<[u32; 3]> {
    let bytes = field.as_bytes();
    if bytes.len() != 6 || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let pair = |i: usize| ((bytes[i] - b'0') * 10 + (bytes[i + 1] - b'0')) as u32;
    Some([pair(0), pair(2), pair(4)])
}

/// Speed over ground in knots to km/h. Empty or non-numeric fields give `None`.
pub fn knots_to_kph(field: &str) -> Option<f64> {
    parse_number(field).map(|knots| knots * KNOTS_TO_KPH)
}

pub fn parse_number(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn valid_latitude(lat: f64) -> bool {
    lat.is_finite() && (-90.0..=90.0).contains(&lat)
}

pub fn valid_longitude(lon: f64) -> bool {
    lon.is_finite() && (-180.0..=180.0).contains(&lon)
}
