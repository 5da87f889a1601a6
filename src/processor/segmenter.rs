//! Gap-based ride segmentation.
//!
//! Per vehicle only the last assigned fix time, the latest fix time, the
//! active ride and its start are kept. A fix within `gap` of the previous one
//! (either direction) joins the active ride; anything further away opens a new
//! ride and closes the old one at its latest fix.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::ping::LastPing;
use crate::models::ride::Ride;

#[derive(Debug, Clone, Copy)]
struct RideState {
    ride_id: Uuid,
    started_at: DateTime<Utc>,
    /// Time of the most recently assigned fix; gaps are measured from here.
    last_ts: DateTime<Utc>,
    /// Latest fix time in the ride, which late arrivals never lower.
    max_ts: DateTime<Utc>,
    touched: Instant,
}

impl RideState {
    fn ride(&self, vehicle_id: Uuid, ended_at: Option<DateTime<Utc>>) -> Ride {
        Ride {
            id: self.ride_id,
            vehicle_id,
            started_at: self.started_at,
            ended_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// The ride the fix belongs to, with its current start time.
    pub ride: Ride,
    pub opened: bool,
    /// The ride this fix ended, if it opened a new one.
    pub closed: Option<Ride>,
}

pub struct RideSegmenter {
    gap: Duration,
    idle_ttl: std::time::Duration,
    state: Mutex<HashMap<Uuid, RideState>>,
}

impl RideSegmenter {
    pub fn new(gap: Duration, idle_ttl: std::time::Duration) -> Self {
        Self {
            gap,
            idle_ttl,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, HashMap<Uuid, RideState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_tracked(&self, vehicle_id: Uuid) -> bool {
        self.state().contains_key(&vehicle_id)
    }

    pub fn tracked(&self) -> usize {
        self.state().len()
    }

    /// Restores a vehicle's view from its last stored fix. Ignored if the
    /// vehicle is already tracked.
    pub fn seed(&self, vehicle_id: Uuid, last: LastPing) {
        self.state().entry(vehicle_id).or_insert(RideState {
            ride_id: last.ride_id,
            started_at: last.ride_started_at,
            last_ts: last.ts,
            max_ts: last.ts,
            touched: Instant::now(),
        });
    }

    pub fn assign(&self, vehicle_id: Uuid, ts: DateTime<Utc>) -> Assignment {
        let mut state = self.state();
        let now = Instant::now();

        if let Some(current) = state.get_mut(&vehicle_id) {
            let gap = ts.signed_duration_since(current.last_ts);
            let magnitude = if gap < Duration::zero() { -gap } else { gap };
            if magnitude < self.gap {
                current.last_ts = ts;
                current.max_ts = current.max_ts.max(ts);
                current.touched = now;
                if ts < current.started_at {
                    debug!("Out-of-order fix moves ride {} start to {}", current.ride_id, ts);
                    current.started_at = ts;
                }
                return Assignment {
                    ride: current.ride(vehicle_id, None),
                    opened: false,
                    closed: None,
                };
            }
        }

        let ride = Ride::open(vehicle_id, ts);
        let previous = state.insert(
            vehicle_id,
            RideState {
                ride_id: ride.id,
                started_at: ts,
                last_ts: ts,
                max_ts: ts,
                touched: now,
            },
        );
        let closed = previous.map(|p| p.ride(vehicle_id, Some(p.max_ts)));

        match &closed {
            Some(old) => info!(
                "Started new ride {} for vehicle {} (ended ride {})",
                ride.id, vehicle_id, old.id
            ),
            None => info!("Started new ride {} for vehicle {}", ride.id, vehicle_id),
        }

        Assignment {
            ride,
            opened: true,
            closed,
        }
    }

    /// Drops views untouched for longer than the idle TTL.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state();
        let before = state.len();
        state.retain(|_, s| now.duration_since(s.touched) < self.idle_ttl);
        before - state.len()
    }
}
