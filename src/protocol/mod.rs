pub mod fields;
pub mod framer;
pub mod hq;
pub mod nmea;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use framer::FrameExtractor;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unrecognised frame format")]
    UnknownFormat,

    #[error("frame header is not HQ: {0:?}")]
    NotHq(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("no GPS fix (status {0:?})")]
    NoFix(String),

    #[error("invalid {axis} value {value:?}")]
    InvalidCoordinate { axis: &'static str, value: String },

    #[error("{axis} {value} out of range")]
    OutOfRange { axis: &'static str, value: f64 },

    #[error("unsupported NMEA sentence {0:?}")]
    UnsupportedSentence(String),

    #[error("malformed checksum {0:?}")]
    MalformedChecksum(String),

    #[error("checksum mismatch: frame says {expected:02X}, computed {computed:02X}")]
    ChecksumMismatch { expected: u8, computed: u8 },
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Where a fix's timestamp came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSource {
    Device,
    /// Device time was missing or malformed; the receipt time was used.
    Receipt,
}

/// One decoded GPS observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    /// `None` for protocols that don't identify the sender (NMEA).
    pub device_id: Option<String>,
    pub ts: DateTime<Utc>,
    pub time_source: TimeSource,
    pub lat: f64,
    pub lon: f64,
    pub speed_kph: Option<f64>,
    pub course: Option<f64>,
    pub raw: String,
}

/// A frame classified by its start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Hq(&'a str),
    Nmea(&'a str),
    Unknown(&'a str),
}

impl<'a> Frame<'a> {
    pub fn classify(text: &'a str) -> Self {
        let trimmed = text.trim();
        if trimmed.starts_with('*') && trimmed.trim_start_matches('*').starts_with("HQ") {
            Frame::Hq(trimmed)
        } else if trimmed.starts_with('$') {
            Frame::Nmea(trimmed)
        } else {
            Frame::Unknown(trimmed)
        }
    }
}

/// Decodes one frame of a specific protocol.
///
/// `received_at` is the wall-clock receipt time, used when the frame's own
/// timestamp can't be trusted.
pub trait FrameDecoder {
    fn decode(&self, frame: &str, received_at: DateTime<Utc>) -> DecodeResult<Fix>;
}

/// Classifies `text` and dispatches to the matching decoder.
pub fn decode_frame(text: &str, received_at: DateTime<Utc>) -> DecodeResult<Fix> {
    match Frame::classify(text) {
        Frame::Hq(frame) => hq::HqDecoder.decode(frame, received_at),
        Frame::Nmea(frame) => nmea::NmeaDecoder.decode(frame, received_at),
        Frame::Unknown(_) => Err(DecodeError::UnknownFormat),
    }
}

/// Best-effort sender id of a frame that may not decode.
pub fn device_id(text: &str) -> Option<&str> {
    match Frame::classify(text) {
        Frame::Hq(frame) => hq::HqDecoder::device_id(frame),
        Frame::Nmea(_) | Frame::Unknown(_) => None,
    }
}

pub(crate) fn field<'a>(parts: &[&'a str], index: usize, name: &'static str) -> DecodeResult<&'a str> {
    match parts.get(index) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim()),
        _ => Err(DecodeError::MissingField(name)),
    }
}

/// Decodes a latitude/longitude pair and checks both ranges.
pub(crate) fn coordinates(
    lat: (&str, &str),
    lon: (&str, &str),
) -> DecodeResult<(f64, f64)> {
    let lat_value = fields::dm_to_decimal(lat.0, lat.1).ok_or_else(|| {
        DecodeError::InvalidCoordinate {
            axis: "latitude",
            value: lat.0.to_string(),
        }
    })?;
    let lon_value = fields::dm_to_decimal(lon.0, lon.1).ok_or_else(|| {
        DecodeError::InvalidCoordinate {
            axis: "longitude",
            value: lon.0.to_string(),
        }
    })?;

    if !fields::valid_latitude(lat_value) {
        return Err(DecodeError::OutOfRange {
            axis: "latitude",
            value: lat_value,
        });
    }
    if !fields::valid_longitude(lon_value) {
        return Err(DecodeError::OutOfRange {
            axis: "longitude",
            value: lon_value,
        });
    }
    Ok((lat_value, lon_value))
}
