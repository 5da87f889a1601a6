use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::processor::ingest::Ingestor;
use crate::protocol::FrameExtractor;

const READ_BUFFER_SIZE: usize = 4096;

/// Accepts tracker connections until `shutdown` resolves, one task each.
pub async fn run<F>(
    listener: TcpListener,
    ingestor: Arc<Ingestor>,
    max_frame_len: usize,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    info!("TCP GPS service listening on {}", listener.local_addr()?);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down TCP listener...");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    let ordinal = ingestor.stats().record_connection_opened();
                    info!("GPS tracker connected from: {} (Connection #{})", peer, ordinal);
                    let ingestor = ingestor.clone();
                    // Process the connection in its own task so slow trackers never block accept
                    tokio::spawn(async move {
                        handle_connection(socket, peer.to_string(), ingestor, max_frame_len).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    Ok(())
}

/// Reads chunks from one tracker until it disconnects, acknowledging each
/// chunk that completed a frame or held only noise.
pub async fn handle_connection<S>(
    mut socket: S,
    peer: String,
    ingestor: Arc<Ingestor>,
    max_frame_len: usize,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stats = ingestor.stats().clone();
    let started = Instant::now();
    let mut extractor = FrameExtractor::new(max_frame_len);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut packets = 0u64;

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) => {
                info!("GPS tracker {} disconnected", peer);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                stats.record_error();
                warn!("TCP socket error from {}: {}", peer, e);
                break;
            }
        };

        packets += 1;
        let ordinal = stats.record_packet();
        debug!("Packet #{} from {}: len={}", ordinal, peer, n);

        let outcome = ingestor
            .ingest_chunk(&mut extractor, &buf[..n], Utc::now())
            .await;
        debug!(
            "Chunk from {}: {} frames, {} decoded, {} forwarded",
            peer, outcome.frames, outcome.decoded, outcome.forwarded
        );

        if let Some(ack) = outcome.ack {
            if let Err(e) = socket.write_all(ack.token()).await {
                stats.record_error();
                warn!("Failed to acknowledge {}: {}", peer, e);
                break;
            }
        }
    }

    stats.record_connection_closed();
    info!(
        "Connection summary for {}: {} packets in {}ms",
        peer,
        packets,
        started.elapsed().as_millis()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::testing::RecordingSink;
    use crate::processor::ingest::tests::{ingestor, FRAME};
    use crate::store::memory::MemoryStore;

    async fn read_token<S: AsyncRead + Unpin>(client: &mut S, len: usize) -> String {
        let mut reply = vec![0u8; len];
        client.read_exact(&mut reply).await.unwrap();
        String::from_utf8(reply).unwrap()
    }

    #[tokio::test]
    async fn test_connection_acks() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let ingestor = Arc::new(ingestor(store.clone(), sink.clone()));
        let (mut client, server) = tokio::io::duplex(4096);

        let handle = tokio::spawn(handle_connection(
            server,
            "test".to_string(),
            ingestor.clone(),
            1024,
        ));

        client.write_all(FRAME.as_bytes()).await.unwrap();
        assert_eq!(read_token(&mut client, 4).await, "OK\r\n");

        let no_fix = FRAME.replace(",A,", ",V,");
        client.write_all(no_fix.as_bytes()).await.unwrap();
        assert_eq!(read_token(&mut client, 5).await, "ACK\r\n");

        drop(client);
        handle.await.unwrap();

        let snap = ingestor.stats().snapshot();
        assert_eq!(snap.packets_received, 2);
        assert_eq!(snap.packets_decoded, 1);
        assert_eq!(snap.decode_failures, 1);
        assert_eq!(store.pings().len(), 1);
        assert_eq!(sink.records().len(), 2);
    }

    #[tokio::test]
    async fn test_listener_accepts_and_shuts_down() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let ingestor = Arc::new(ingestor(store, sink));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(run(listener, ingestor.clone(), 1024, async move {
            let _ = stop_rx.await;
        }));

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client.write_all(FRAME.as_bytes()).await.unwrap();
        assert_eq!(read_token(&mut client, 4).await, "OK\r\n");
        assert_eq!(ingestor.stats().snapshot().connections_total, 1);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
