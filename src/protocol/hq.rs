//! Decoder for the `*HQ,...#` text protocol spoken by ST-915 style trackers.
//!
//! ```text
//! *HQ,4210051415,V1,132707,A,3612.8854,N,08140.0735,W,000.00,000,110825,FFFFFBFF,...#
//!     id         ver time  fix lat      hemi lon      hemi knots course date
//! ```

use chrono::{DateTime, Utc};

use super::fields::{knots_to_kph, parse_number, utc_timestamp};
use super::{coordinates, field, DecodeError, DecodeResult, Fix, FrameDecoder, TimeSource};

const IDX_HEADER: usize = 0;
const IDX_DEVICE_ID: usize = 1;
const IDX_TIME: usize = 3;
const IDX_FIX_FLAG: usize = 4;
const IDX_LAT: usize = 5;
const IDX_LAT_HEMI: usize = 6;
const IDX_LON: usize = 7;
const IDX_LON_HEMI: usize = 8;
const IDX_SPEED: usize = 9;
const IDX_COURSE: usize = 10;
const IDX_DATE: usize = 11;

#[derive(Debug, Default, Clone, Copy)]
pub struct HqDecoder;

fn split(frame: &str) -> Vec<&str> {
    frame
        .trim()
        .trim_start_matches('*')
        .trim_end_matches('#')
        .split(',')
        .collect()
}

impl HqDecoder {
    /// The sender's id, read without validating the rest of the frame.
    pub fn device_id(frame: &str) -> Option<&str> {
        let parts = split(frame);
        if parts.get(IDX_HEADER).copied() != Some("HQ") {
            return None;
        }
        field(&parts, IDX_DEVICE_ID, "device id").ok()
    }
}

impl FrameDecoder for HqDecoder {
    fn decode(&self, frame: &str, received_at: DateTime<Utc>) -> DecodeResult<Fix> {
        let parts = split(frame);

        let header = parts.get(IDX_HEADER).copied().unwrap_or_default();
        if header != "HQ" {
            return Err(DecodeError::NotHq(header.to_string()));
        }

        let device_id = field(&parts, IDX_DEVICE_ID, "device id")?;

        let flag = parts.get(IDX_FIX_FLAG).copied().unwrap_or_default();
        if flag != "A" {
            return Err(DecodeError::NoFix(flag.to_string()));
        }

        let (lat, lon) = coordinates(
            (
                field(&parts, IDX_LAT, "latitude")?,
                field(&parts, IDX_LAT_HEMI, "latitude hemisphere")?,
            ),
            (
                field(&parts, IDX_LON, "longitude")?,
                field(&parts, IDX_LON_HEMI, "longitude hemisphere")?,
            ),
        )?;

        let optional = |index: usize| parts.get(index).copied().unwrap_or_default();
        let (ts, time_source) = match utc_timestamp(optional(IDX_TIME), optional(IDX_DATE)) {
            Some(ts) => (ts, TimeSource::Device),
            None => (received_at, TimeSource::Receipt),
        };

        Ok(Fix {
            device_id: Some(device_id.to_string()),
            ts,
            time_source,
            lat,
            lon,
            speed_kph: knots_to_kph(optional(IDX_SPEED)),
            course: parse_number(optional(IDX_COURSE)),
            raw: frame.to_string(),
        })
    }
}
