use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::protocol::Fix;

/// A persisted fix.
#[derive(Debug, Clone, PartialEq)]
pub struct Ping {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub ride_id: Uuid,
    pub ts: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub speed_kph: Option<f64>,
    pub course: Option<f64>,
    pub raw: Option<String>,
}

impl Ping {
    pub fn from_fix(fix: &Fix, vehicle_id: Uuid, ride_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            vehicle_id,
            ride_id,
            ts: fix.ts,
            lat: fix.lat,
            lon: fix.lon,
            speed_kph: fix.speed_kph,
            course: fix.course,
            raw: Some(fix.raw.clone()),
        }
    }
}

/// Latest persisted fix of a vehicle joined with its ride's start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct LastPing {
    pub ts: DateTime<Utc>,
    pub ride_id: Uuid,
    pub ride_started_at: DateTime<Utc>,
}
