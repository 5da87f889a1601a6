//! Delivery of sink records with a per-record timeout and a circuit breaker.
//!
//! Delivery is at-most-once: a failed record is counted, logged and dropped.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::record::SinkRecord;
use crate::stats::Stats;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("circuit open, retrying in {0:?}")]
    CircuitOpen(Duration),

    #[error("failed to serialise record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Request/response transport to the ingestion sink.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, key: &str, payload: &[u8]) -> Result<(), SinkError>;
}

#[derive(Debug)]
struct Breaker {
    consecutive_failures: u32,
    max_failures: u32,
    cooldown: Duration,
    open_until: Option<Instant>,
}

impl Breaker {
    /// `Err` carries the remaining cooldown while the breaker is open.
    fn check(&mut self, now: Instant) -> Result<(), Duration> {
        match self.open_until {
            Some(until) if now < until => Err(until - now),
            Some(_) => {
                self.open_until = None;
                self.consecutive_failures = 0;
                info!("Circuit breaker reset. Resuming forwarding.");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn on_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns true when this failure tripped the breaker.
    fn on_failure(&mut self, now: Instant) -> bool {
        self.consecutive_failures += 1;
        if self.max_failures > 0
            && self.consecutive_failures >= self.max_failures
            && self.open_until.is_none()
        {
            self.open_until = Some(now + self.cooldown);
            return true;
        }
        false
    }
}

pub struct Forwarder {
    sink: Arc<dyn Sink>,
    timeout: Duration,
    breaker: Mutex<Breaker>,
    stats: Arc<Stats>,
}

impl Forwarder {
    /// `max_failures == 0` disables the circuit breaker.
    pub fn new(
        sink: Arc<dyn Sink>,
        timeout: Duration,
        max_failures: u32,
        cooldown: Duration,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            sink,
            timeout,
            breaker: Mutex::new(Breaker {
                consecutive_failures: 0,
                max_failures,
                cooldown,
                open_until: None,
            }),
            stats,
        }
    }

    fn with_breaker<T>(&self, f: impl FnOnce(&mut Breaker) -> T) -> T {
        let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut breaker)
    }

    pub async fn forward(&self, record: &SinkRecord) -> Result<(), SinkError> {
        let key = record.key();

        if let Err(remaining) = self.with_breaker(|b| b.check(Instant::now())) {
            self.stats.record_error();
            debug!("Dropping record for {} while circuit is open", key);
            return Err(SinkError::CircuitOpen(remaining));
        }

        let outcome = match serde_json::to_vec(record) {
            Ok(payload) => {
                match tokio::time::timeout(self.timeout, self.sink.deliver(key, &payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::Timeout(self.timeout)),
                }
            }
            Err(e) => Err(SinkError::from(e)),
        };

        match &outcome {
            Ok(()) => {
                self.stats.record_forwarded();
                self.with_breaker(Breaker::on_success);
                debug!("Forwarded record for {}", key);
            }
            Err(e) => {
                self.stats.record_error();
                error!("Error forwarding record for {}: {}", key, e);
                let (tripped, failures, cooldown) = self.with_breaker(|b| {
                    (b.on_failure(Instant::now()), b.consecutive_failures, b.cooldown)
                });
                if tripped {
                    warn!(
                        "Circuit breaker tripped ({} consecutive failures)! Pausing forwarding for {:?}",
                        failures, cooldown
                    );
                }
            }
        }
        outcome
    }

    /// Forwards a batch concurrently, returning how many were delivered.
    pub async fn forward_all(&self, records: &[SinkRecord]) -> usize {
        join_all(records.iter().map(|record| self.forward(record)))
            .await
            .iter()
            .filter(|result| result.is_ok())
            .count()
    }
}
