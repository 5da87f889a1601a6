//! Storage contracts consumed by the ingestion pipeline.
//!
//! The pipeline only talks to [`Store`]; the PostgreSQL adapter lives in
//! `crate::db`.

#[cfg(test)]
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::ping::{LastPing, Ping};
use crate::models::ride::Ride;
use crate::models::vehicle::Vehicle;

#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the vehicle keyed by `imei`, creating it on first sight.
    /// Concurrent calls for the same unseen key must yield one vehicle.
    async fn resolve_vehicle(&self, imei: &str) -> Result<Vehicle>;

    /// The most recently recorded fix of a vehicle and its ride.
    async fn last_ping(&self, vehicle_id: Uuid) -> Result<Option<LastPing>>;

    /// Persists `ping`, creating `ride` if needed. An existing ride keeps the
    /// earlier of the two start times.
    async fn record_ping(&self, ride: &Ride, ping: &Ping) -> Result<()>;

    /// Marks `ride` as ended at `ride.ended_at`.
    async fn close_ride(&self, ride: &Ride) -> Result<()>;
}
