use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::Store;
use crate::models::ping::{LastPing, Ping};
use crate::models::ride::Ride;
use crate::models::vehicle::Vehicle;

/// In-process store for tests.
#[derive(Default)]
pub struct MemoryStore {
    vehicles: Mutex<HashMap<String, Vehicle>>,
    rides: Mutex<HashMap<Uuid, Ride>>,
    pings: Mutex<Vec<Ping>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn vehicles(&self) -> Vec<Vehicle> {
        self.vehicles.lock().unwrap().values().cloned().collect()
    }

    pub fn ride(&self, id: Uuid) -> Option<Ride> {
        self.rides.lock().unwrap().get(&id).cloned()
    }

    pub fn pings(&self) -> Vec<Ping> {
        self.pings.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        Ok(())
    }

    fn upsert_ride(&self, ride: &Ride) {
        let mut rides = self.rides.lock().unwrap();
        let entry = rides.entry(ride.id).or_insert_with(|| ride.clone());
        entry.started_at = entry.started_at.min(ride.started_at);
        entry.ended_at = entry.ended_at.max(ride.ended_at);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn resolve_vehicle(&self, imei: &str) -> Result<Vehicle> {
        self.check()?;
        tokio::task::yield_now().await;
        let mut vehicles = self.vehicles.lock().unwrap();
        Ok(vehicles
            .entry(imei.to_string())
            .or_insert_with(|| Vehicle::first_seen(imei))
            .clone())
    }

    async fn last_ping(&self, vehicle_id: Uuid) -> Result<Option<LastPing>> {
        self.check()?;
        let pings = self.pings.lock().unwrap();
        let rides = self.rides.lock().unwrap();
        Ok(pings
            .iter()
            .rev()
            .find(|p| p.vehicle_id == vehicle_id)
            .and_then(|p| {
                rides.get(&p.ride_id).map(|r| LastPing {
                    ts: p.ts,
                    ride_id: r.id,
                    ride_started_at: r.started_at,
                })
            }))
    }

    async fn record_ping(&self, ride: &Ride, ping: &Ping) -> Result<()> {
        self.check()?;
        self.upsert_ride(ride);
        self.pings.lock().unwrap().push(ping.clone());
        Ok(())
    }

    async fn close_ride(&self, ride: &Ride) -> Result<()> {
        self.check()?;
        self.upsert_ride(ride);
        Ok(())
    }
}
