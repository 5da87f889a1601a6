//! NMEA 0183 `RMC` sentences, accepted from any talker (`GP`, `GN`, `GL`, ...).
//!
//! RMC carries position, speed and a full UTC date, so it maps onto a [`Fix`]
//! directly. It does not identify the sender.

use chrono::{DateTime, Utc};

use super::fields::{knots_to_kph, parse_number, utc_timestamp};
use super::{coordinates, field, DecodeError, DecodeResult, Fix, FrameDecoder, TimeSource};

#[derive(Debug, Default, Clone, Copy)]
pub struct NmeaDecoder;

impl FrameDecoder for NmeaDecoder {
    fn decode(&self, frame: &str, received_at: DateTime<Utc>) -> DecodeResult<Fix> {
        let sentence = frame.trim();
        let body = sentence
            .strip_prefix('$')
            .ok_or(DecodeError::UnknownFormat)?;

        let data = match body.rsplit_once('*') {
            Some((data, checksum)) => {
                verify_checksum(data, checksum)?;
                data
            }
            None => body,
        };

        let parts: Vec<&str> = data.split(',').collect();
        let id = parts.first().copied().unwrap_or_default();
        if !is_rmc(id) {
            return Err(DecodeError::UnsupportedSentence(id.to_string()));
        }

        let status = parts.get(2).copied().unwrap_or_default();
        if status != "A" {
            return Err(DecodeError::NoFix(status.to_string()));
        }

        let (lat, lon) = coordinates(
            (
                field(&parts, 3, "latitude")?,
                field(&parts, 4, "latitude hemisphere")?,
            ),
            (
                field(&parts, 5, "longitude")?,
                field(&parts, 6, "longitude hemisphere")?,
            ),
        )?;

        let optional = |index: usize| parts.get(index).copied().unwrap_or_default();
        // hhmmss may carry fractional seconds
        let hhmmss = optional(1).get(..6).unwrap_or_default();
        let (ts, time_source) = match utc_timestamp(hhmmss, optional(9)) {
            Some(ts) => (ts, TimeSource::Device),
            None => (received_at, TimeSource::Receipt),
        };

        Ok(Fix {
            device_id: None,
            ts,
            time_source,
            lat,
            lon,
            speed_kph: knots_to_kph(optional(7)),
            course: parse_number(optional(8)),
            raw: frame.to_string(),
        })
    }
}

fn verify_checksum(data: &str, checksum: &str) -> DecodeResult<()> {
    let checksum = checksum.trim();
    let expected = u8::from_str_radix(checksum, 16)
        .ok()
        .filter(|_| checksum.len() == 2)
        .ok_or_else(|| DecodeError::MalformedChecksum(checksum.to_string()))?;
    let computed = data.bytes().fold(0u8, |acc, b| acc ^ b);
    if computed != expected {
        return Err(DecodeError::ChecksumMismatch { expected, computed });
    }
    Ok(())
}

/// `ttRMC` with a two-letter talker; proprietary `P...` ids are not RMC.
fn is_rmc(id: &str) -> bool {
    match id.as_bytes() {
        [t1, t2, b'R', b'M', b'C'] => {
            *t1 != b'P' && t1.is_ascii_uppercase() && t2.is_ascii_uppercase()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";

    #[test]
    fn test_decode_rmc() {
        let fix = NmeaDecoder.decode(RMC, Utc::now()).unwrap();
        assert_eq!(fix.device_id, None);
        assert!((fix.lat - (48.0 + 7.038 / 60.0)).abs() < 1e-9);
        assert!((fix.lon - (11.0 + 31.0 / 60.0)).abs() < 1e-9);
        assert_eq!(fix.ts, Utc.with_ymd_and_hms(2094, 3, 23, 12, 35, 19).unwrap());
        assert!((fix.speed_kph.unwrap() - 22.4 * 1.852).abs() < 1e-9);
        assert_eq!(fix.course, Some(84.4));
    }

    #[test]
    fn test_checksum_mismatch() {
        let bad = RMC.replace("*6A", "*6B");
        assert_eq!(
            NmeaDecoder.decode(&bad, Utc::now()),
            Err(DecodeError::ChecksumMismatch {
                expected: 0x6B,
                computed: 0x6A
            })
        );
    }

    #[test]
    fn test_without_checksum_and_fractional_time() {
        let sentence = "$GNRMC,132707.00,A,3612.8854,N,08140.0735,W,,,110825,,";
        let fix = NmeaDecoder.decode(sentence, Utc::now()).unwrap();
        assert_eq!(fix.ts, Utc.with_ymd_and_hms(2025, 8, 11, 13, 27, 7).unwrap());
        assert_eq!(fix.speed_kph, None);
    }

    #[test]
    fn test_void_status() {
        let sentence = "$GPRMC,123519,V,,,,,,,230394,,";
        assert_eq!(
            NmeaDecoder.decode(sentence, Utc::now()),
            Err(DecodeError::NoFix("V".to_string()))
        );
    }

    #[test]
    fn test_unsupported_sentence() {
        let sentence = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";
        assert!(matches!(
            NmeaDecoder.decode(sentence, Utc::now()),
            Err(DecodeError::UnsupportedSentence(id)) if id == "GPGGA"
        ));
    }

    #[rstest]
    #[case::proprietary("$PGRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W")]
    #[case::long_talker("$GPXRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W")]
    #[case::bare("$RMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W")]
    fn test_rejects_non_talker_rmc(#[case] sentence: &str) {
        assert!(matches!(
            NmeaDecoder.decode(sentence, Utc::now()),
            Err(DecodeError::UnsupportedSentence(_))
        ));
    }
}
