use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config;

pub mod models;
pub mod rls;

/// Build the process-wide connection pool from config. Every tenant
/// request checks one connection out of this pool for its whole lifetime.
pub async fn init_pool() -> Result<PgPool, sqlx::Error> {
    let cfg = &config::config().database;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.pool_max)
        .acquire_timeout(Duration::from_millis(cfg.connection_timeout_ms))
        .idle_timeout(Duration::from_millis(cfg.idle_timeout_ms))
        .connect(&cfg.url)
        .await?;

    info!("database pool ready (max_connections={})", cfg.pool_max);
    Ok(pool)
}

/// Pings the pool to ensure connectivity
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
