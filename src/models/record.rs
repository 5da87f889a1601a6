use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::protocol::Fix;

pub const SOURCE: &str = "tcp-service";

/// Payload handed to the ingestion sink, one per decoded fix or diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkRecord {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(serialize_with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,
    pub imei: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_kph: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub debug: bool,
    pub source: &'static str,
}

impl SinkRecord {
    pub fn from_fix(fix: &Fix, vehicle_id: Option<Uuid>, ride_id: Option<Uuid>) -> Self {
        Self {
            lat: Some(fix.lat),
            lon: Some(fix.lon),
            timestamp: fix.ts,
            imei: fix.device_id.clone(),
            speed_kph: fix.speed_kph,
            course: fix.course,
            vehicle_id,
            ride_id,
            raw: Some(fix.raw.clone()),
            debug: false,
            source: SOURCE,
        }
    }

    /// An undecodable frame or chunk, kept for operators to inspect.
    pub fn diagnostic(raw: &str, received_at: DateTime<Utc>) -> Self {
        Self {
            lat: None,
            lon: None,
            timestamp: received_at,
            imei: None,
            speed_kph: None,
            course: None,
            vehicle_id: None,
            ride_id: None,
            raw: Some(raw.to_string()),
            debug: true,
            source: SOURCE,
        }
    }

    /// Tags a diagnostic with the sender's id when the frame exposed one.
    pub fn with_imei(mut self, imei: Option<&str>) -> Self {
        self.imei = imei.map(str::to_string);
        self
    }

    /// Partition key for the sink: the device id, or `debug` for diagnostics.
    pub fn key(&self) -> &str {
        match (&self.imei, self.debug) {
            (Some(imei), false) => imei,
            _ => "debug",
        }
    }
}

fn rfc3339_millis<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
