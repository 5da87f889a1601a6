mod config;
mod db;
mod forwarder;
mod kafka;
mod models;
mod processor;
mod protocol;
mod server;
mod stats;
mod store;

use config::AppConfig;
use forwarder::Forwarder;
use processor::ingest::Ingestor;
use processor::resolver::DeviceResolver;
use processor::segmenter::RideSegmenter;
use stats::Stats;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting HQ ingest service on {}...", config.tcp_bind_addr);

    // Init DB
    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
    db::ensure_schema(&pool).await?;
    info!("Connected to database");
    let store = Arc::new(db::PgStore::new(pool));

    // Init sink
    let sink = Arc::new(kafka::KafkaSink::new(&config)?);

    let stats = Arc::new(Stats::new());
    let forwarder = Forwarder::new(
        sink.clone(),
        config.forward_timeout(),
        config.forward_max_failures,
        config.forward_cooldown(),
        stats.clone(),
    );
    let ingestor = Arc::new(Ingestor::new(
        store.clone(),
        DeviceResolver::new(store, config.resolver_cache_size),
        RideSegmenter::new(config.ride_gap(), config.ride_state_ttl()),
        forwarder,
        stats.clone(),
    ));

    spawn_stats_logger(stats, Duration::from_secs(config.stats_interval_secs.max(1)));
    spawn_ride_state_sweeper(ingestor.clone(), config.ride_state_ttl());

    let listener = TcpListener::bind(&config.tcp_bind_addr).await?;
    server::run(listener, ingestor, config.max_frame_len, shutdown_signal()).await?;

    sink.flush(config.forward_timeout());
    info!("TCP server closed");
    Ok(())
}

fn spawn_stats_logger(stats: Arc<Stats>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let s = stats.snapshot();
            info!(
                "Stats: connections={} active={} received={} decoded={} forwarded={} decode_failures={} errors={}",
                s.connections_total,
                s.connections_active,
                s.packets_received,
                s.packets_decoded,
                s.packets_forwarded,
                s.decode_failures,
                s.errors
            );
        }
    });
}

fn spawn_ride_state_sweeper(ingestor: Arc<Ingestor>, ttl: Duration) {
    let every = ttl.clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let evicted = ingestor.segmenter().evict_idle();
            if evicted > 0 {
                info!(
                    "Evicted {} idle ride states ({} still tracked)",
                    evicted,
                    ingestor.segmenter().tracked()
                );
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
