pub mod models;

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::store::PgStore;

/// Connection pool sizing. A monitoring cycle or a request holds at most one
/// connection at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// How long a session waits for a free connection before failing with a
    /// persistence error.
    pub acquire_timeout: Duration,
}

/// Connect, apply pending migrations and wrap the pool in a [`PgStore`].
pub async fn open_store(database_url: &str, settings: PoolSettings) -> Result<PgStore> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(database_url)
        .await
        .context("Failed to connect to the database at DATABASE_URL")?;

    migrate(&pool).await?;
    info!(
        max_connections = settings.max_connections,
        "Database ready"
    );
    Ok(PgStore::new(pool))
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to apply database migrations")
}
