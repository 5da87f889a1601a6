use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::forwarder::Forwarder;
use crate::models::ping::Ping;
use crate::models::record::SinkRecord;
use crate::processor::resolver::DeviceResolver;
use crate::processor::segmenter::RideSegmenter;
use crate::protocol::{decode_frame, device_id, Fix, FrameExtractor, TimeSource};
use crate::stats::Stats;
use crate::store::Store;

/// Reply written back to the device after a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// At least one fix in the chunk decoded.
    Ok,
    /// Frames or noise arrived but nothing decoded.
    Ack,
}

impl Ack {
    pub fn token(self) -> &'static [u8] {
        match self {
            Ack::Ok => b"OK\r\n",
            Ack::Ack => b"ACK\r\n",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub frames: usize,
    pub decoded: usize,
    pub forwarded: usize,
    /// `None` while the chunk only extended a partial frame.
    pub ack: Option<Ack>,
}

/// Runs chunks through decode, resolve, segment, persist and forward.
pub struct Ingestor {
    store: Arc<dyn Store>,
    resolver: DeviceResolver,
    segmenter: RideSegmenter,
    forwarder: Forwarder,
    stats: Arc<Stats>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn Store>,
        resolver: DeviceResolver,
        segmenter: RideSegmenter,
        forwarder: Forwarder,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            store,
            resolver,
            segmenter,
            forwarder,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn segmenter(&self) -> &RideSegmenter {
        &self.segmenter
    }

    pub async fn ingest_chunk(
        &self,
        extractor: &mut FrameExtractor,
        chunk: &[u8],
        received_at: DateTime<Utc>,
    ) -> ChunkOutcome {
        let frames = extractor.push(chunk);

        if frames.is_empty() && extractor.has_pending() {
            debug!("Waiting for rest of frame ({} bytes buffered)", extractor.pending_len());
            return ChunkOutcome {
                frames: 0,
                decoded: 0,
                forwarded: 0,
                ack: None,
            };
        }

        let mut records = Vec::with_capacity(frames.len().max(1));
        let mut decoded = 0;

        for frame in &frames {
            match decode_frame(frame, received_at) {
                Ok(fix) => {
                    decoded += 1;
                    self.stats.record_decoded();
                    info!(
                        "Parsed: device={:?} lat={} lon={} ts={}",
                        fix.device_id, fix.lat, fix.lon, fix.ts
                    );
                    if fix.time_source == TimeSource::Receipt {
                        warn!("Frame carried no usable timestamp, using receipt time: {}", frame);
                    }
                    records.push(self.place(&fix).await);
                }
                Err(e) => {
                    self.stats.record_decode_failure();
                    warn!("Undecodable frame ({}), forwarding for analysis: {}", e, frame);
                    records.push(
                        SinkRecord::diagnostic(frame, received_at).with_imei(device_id(frame)),
                    );
                }
            }
        }

        if frames.is_empty() {
            let raw = String::from_utf8_lossy(chunk);
            warn!("No frame in chunk, forwarding raw for analysis: {:?}", raw.trim());
            records.push(SinkRecord::diagnostic(raw.trim(), received_at));
        }

        let forwarded = self.forwarder.forward_all(&records).await;

        ChunkOutcome {
            frames: frames.len(),
            decoded,
            forwarded,
            ack: Some(if decoded > 0 { Ack::Ok } else { Ack::Ack }),
        }
    }

    /// Persists a fix and builds its sink record. Persistence failures are
    /// logged and the record goes out without vehicle and ride ids.
    async fn place(&self, fix: &Fix) -> SinkRecord {
        match self.persist(fix).await {
            Ok((vehicle_id, ride_id)) => SinkRecord::from_fix(fix, Some(vehicle_id), Some(ride_id)),
            Err(e) => {
                self.stats.record_error();
                error!(
                    "Failed to persist fix from {:?} (retryable): {:#}",
                    fix.device_id, e
                );
                SinkRecord::from_fix(fix, None, None)
            }
        }
    }

    /// Resolves the vehicle, assigns a ride and stores the fix.
    /// Returns `(vehicle_id, ride_id)`.
    pub async fn persist(&self, fix: &Fix) -> Result<(Uuid, Uuid)> {
        let vehicle_id = self.resolver.resolve(fix.device_id.as_deref()).await?;

        if !self.segmenter.is_tracked(vehicle_id) {
            if let Some(last) = self.store.last_ping(vehicle_id).await? {
                debug!("Seeding ride state of vehicle {} from store", vehicle_id);
                self.segmenter.seed(vehicle_id, last);
            }
        }

        let assignment = self.segmenter.assign(vehicle_id, fix.ts);

        if let Some(closed) = &assignment.closed {
            if let Err(e) = self.store.close_ride(closed).await {
                self.stats.record_error();
                warn!("Failed to close ride {}: {:#}", closed.id, e);
            }
        }

        let ping = Ping::from_fix(fix, vehicle_id, assignment.ride.id);
        self.store.record_ping(&assignment.ride, &ping).await?;
        Ok((vehicle_id, assignment.ride.id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::forwarder::testing::RecordingSink;
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    pub const FRAME: &str =
        "*HQ,4210051415,V1,132707,A,3612.8854,N,08140.0735,W,000.00,000,110825,FFFFFBFF#";

    pub fn ingestor(store: Arc<MemoryStore>, sink: Arc<RecordingSink>) -> Ingestor {
        ingestor_with_ttl(store, sink, Duration::from_secs(3600))
    }

    fn ingestor_with_ttl(
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        ride_state_ttl: Duration,
    ) -> Ingestor {
        let stats = Arc::new(Stats::new());
        let forwarder = Forwarder::new(
            sink,
            Duration::from_millis(200),
            5,
            Duration::from_secs(30),
            stats.clone(),
        );
        Ingestor::new(
            store.clone(),
            DeviceResolver::new(store.clone(), 64),
            RideSegmenter::new(chrono::Duration::minutes(10), ride_state_ttl),
            forwarder,
            stats,
        )
    }

    #[tokio::test]
    async fn test_valid_frame_is_stored_and_forwarded() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let ingestor = ingestor(store.clone(), sink.clone());
        let mut extractor = FrameExtractor::default();

        let outcome = ingestor
            .ingest_chunk(&mut extractor, FRAME.as_bytes(), Utc::now())
            .await;

        assert_eq!(outcome.ack, Some(Ack::Ok));
        assert_eq!(outcome.decoded, 1);
        assert_eq!(outcome.forwarded, 1);

        let pings = store.pings();
        assert_eq!(pings.len(), 1);
        let ride = store.ride(pings[0].ride_id).unwrap();
        assert_eq!(ride.started_at, pings[0].ts);

        let records = sink.records();
        assert_eq!(records[0].0, "4210051415");
        assert_eq!(records[0].1["imei"], "4210051415");
        assert_eq!(records[0].1["timestamp"], "2025-08-11T13:27:07.000Z");
        assert_eq!(records[0].1["rideId"], pings[0].ride_id.to_string());

        let snap = ingestor.stats().snapshot();
        assert_eq!(snap.packets_decoded, 1);
        assert_eq!(snap.packets_forwarded, 1);
    }

    #[tokio::test]
    async fn test_no_fix_frame_is_diagnostic_only() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let ingestor = ingestor(store.clone(), sink.clone());
        let mut extractor = FrameExtractor::default();

        let frame = FRAME.replace(",A,", ",V,");
        let outcome = ingestor
            .ingest_chunk(&mut extractor, frame.as_bytes(), Utc::now())
            .await;

        assert_eq!(outcome.ack, Some(Ack::Ack));
        assert!(store.pings().is_empty());
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1["debug"], true);
        assert_eq!(records[0].1["raw"], frame);
        assert_eq!(records[0].1["imei"], "4210051415");
        assert_eq!(records[0].0, "debug");
        assert_eq!(ingestor.stats().snapshot().decode_failures, 1);
    }

    #[tokio::test]
    async fn test_noise_chunk_forwards_raw() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let ingestor = ingestor(store, sink.clone());
        let mut extractor = FrameExtractor::default();

        let outcome = ingestor
            .ingest_chunk(&mut extractor, b"hello tracker\r\n", Utc::now())
            .await;

        assert_eq!(outcome.ack, Some(Ack::Ack));
        assert_eq!(sink.records()[0].1["raw"], "hello tracker");
        assert!(sink.records()[0].1["imei"].is_null());
    }

    #[tokio::test]
    async fn test_split_frame_matches_whole() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let ingestor = ingestor(store.clone(), sink.clone());
        let mut extractor = FrameExtractor::default();
        let (head, tail) = FRAME.as_bytes().split_at(27);

        let first = ingestor.ingest_chunk(&mut extractor, head, Utc::now()).await;
        assert_eq!(first.ack, None);
        assert!(sink.records().is_empty());

        let second = ingestor.ingest_chunk(&mut extractor, tail, Utc::now()).await;
        assert_eq!(second.ack, Some(Ack::Ok));

        let whole = decode_frame(FRAME, Utc::now()).unwrap();
        let ping = &store.pings()[0];
        assert_eq!((ping.lat, ping.lon, ping.ts), (whole.lat, whole.lon, whole.ts));
    }

    #[tokio::test]
    async fn test_store_failure_still_forwards_and_acks() {
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let sink = Arc::new(RecordingSink::default());
        let ingestor = ingestor(store, sink.clone());
        let mut extractor = FrameExtractor::default();

        let outcome = ingestor
            .ingest_chunk(&mut extractor, FRAME.as_bytes(), Utc::now())
            .await;

        assert_eq!(outcome.ack, Some(Ack::Ok));
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].1.get("rideId").is_none());
        assert_eq!(ingestor.stats().snapshot().errors, 1);
    }

    #[tokio::test]
    async fn test_ride_continues_from_store_after_eviction() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let ingestor = ingestor_with_ttl(store.clone(), sink, Duration::ZERO);
        let base = decode_frame(FRAME, Utc::now()).unwrap();

        let (vehicle, first_ride) = ingestor.persist(&base).await.unwrap();
        assert_eq!(ingestor.segmenter().evict_idle(), 1);
        assert!(!ingestor.segmenter().is_tracked(vehicle));

        let later = Fix {
            ts: base.ts + chrono::Duration::minutes(4),
            ..base.clone()
        };
        let (_, second_ride) = ingestor.persist(&later).await.unwrap();
        assert_eq!(first_ride, second_ride);

        let gap = Fix {
            ts: base.ts + chrono::Duration::minutes(30),
            ..base
        };
        let (_, third_ride) = ingestor.persist(&gap).await.unwrap();
        assert_ne!(second_ride, third_ride);
        let closed = store.ride(first_ride).unwrap();
        assert_eq!(closed.ended_at, Some(later.ts));
    }

    #[tokio::test]
    async fn test_nmea_fix_uses_default_vehicle() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let ingestor = ingestor(store.clone(), sink);
        let mut extractor = FrameExtractor::default();

        let outcome = ingestor
            .ingest_chunk(
                &mut extractor,
                b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n",
                Utc::now(),
            )
            .await;

        assert_eq!(outcome.ack, Some(Ack::Ok));
        assert_eq!(store.vehicles()[0].imei, "veh-default");
    }
}
