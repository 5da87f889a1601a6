use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::ping::{LastPing, Ping};
use crate::models::ride::Ride;
use crate::models::vehicle::Vehicle;
use crate::store::Store;

pub mod queries;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Creates the tables if they don't exist yet.
pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    for statement in queries::SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("failed to apply schema")?;
    }
    info!("Database schema ready");
    Ok(())
}

/// [`Store`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn resolve_vehicle(&self, imei: &str) -> Result<Vehicle> {
        let candidate = Vehicle::first_seen(imei);
        let vehicle = sqlx::query_as::<_, Vehicle>(queries::UPSERT_VEHICLE)
            .bind(candidate.id)
            .bind(&candidate.imei)
            .bind(&candidate.name)
            .bind(&candidate.vehicle_type)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to resolve vehicle {}", imei))?;

        if vehicle.id == candidate.id {
            info!("Created vehicle {} for device {}", vehicle.id, imei);
        }
        Ok(vehicle)
    }

    async fn last_ping(&self, vehicle_id: Uuid) -> Result<Option<LastPing>> {
        let last = sqlx::query_as::<_, LastPing>(queries::SELECT_LAST_PING)
            .bind(vehicle_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to load last ping of vehicle {}", vehicle_id))?;
        Ok(last)
    }

    async fn record_ping(&self, ride: &Ride, ping: &Ping) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(queries::UPSERT_RIDE)
            .bind(ride.id)
            .bind(ride.vehicle_id)
            .bind(ride.started_at)
            .bind(ride.ended_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to upsert ride {}", ride.id))?;

        sqlx::query(queries::INSERT_PING)
            .bind(ping.id)
            .bind(ping.vehicle_id)
            .bind(ping.ride_id)
            .bind(ping.ts)
            .bind(ping.lat)
            .bind(ping.lon)
            .bind(ping.speed_kph)
            .bind(ping.course)
            .bind(ping.raw.as_deref())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert ping for ride {}", ride.id))?;

        tx.commit().await?;
        debug!("Stored ping {} in ride {}", ping.id, ride.id);
        Ok(())
    }

    async fn close_ride(&self, ride: &Ride) -> Result<()> {
        sqlx::query(queries::UPSERT_RIDE)
            .bind(ride.id)
            .bind(ride.vehicle_id)
            .bind(ride.started_at)
            .bind(ride.ended_at)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to close ride {}", ride.id))?;
        info!("Closed ride {} at {:?}", ride.id, ride.ended_at);
        Ok(())
    }
}
