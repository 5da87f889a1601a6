//! Service counters
//!
//! Shared by every connection task; read by the periodic stats log and by
//! whatever health surface sits in front of the service.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct Stats {
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    packets_received: AtomicU64,
    packets_decoded: AtomicU64,
    packets_forwarded: AtomicU64,
    decode_failures: AtomicU64,
    errors: AtomicU64,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub packets_received: u64,
    pub packets_decoded: u64,
    pub packets_forwarded: u64,
    pub decode_failures: u64,
    pub errors: u64,
    pub start_time: DateTime<Utc>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_decoded: AtomicU64::new(0),
            packets_forwarded: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    /// Record an accepted connection, returning its ordinal
    pub fn record_connection_opened(&self) -> u64 {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a chunk read from a socket, returning its ordinal
    pub fn record_packet(&self) -> u64 {
        self.packets_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_decoded(&self) {
        self.packets_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_decoded: self.packets_decoded.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            start_time: self.started_at,
        }
    }
}
