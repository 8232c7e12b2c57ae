/// Database layer for the SaaSPro gateway
///
/// Owns the Postgres connection pool and the embedded migrations. Every
/// manager receives a clone of the same pool from `AppContext`.

use crate::{
    config::DatabaseConfig,
    error::{ApiError, ApiResult},
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info};

/// Pool tuning that is not exposed through the environment
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub acquire_timeout: Duration,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(1800), // 30 minutes
            idle_timeout: Duration::from_secs(600),  // 10 minutes
        }
    }
}

fn pool_options(config: &DatabaseConfig, options: &PoolOptions) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(options.acquire_timeout)
        .max_lifetime(options.max_lifetime)
        .idle_timeout(options.idle_timeout)
}

/// Create a PostgreSQL connection pool
pub async fn create_pool(config: &DatabaseConfig, options: PoolOptions) -> ApiResult<PgPool> {
    info!("Connecting to PostgreSQL database...");
    info!("  Max connections: {}", config.max_connections);
    info!("  Min connections: {}", config.min_connections);

    let pool = pool_options(config, &options)
        .connect(&config.url)
        .await
        .map_err(|e| {
            error!("Failed to connect to PostgreSQL: {}", e);
            ApiError::Database(e)
        })?;

    info!("PostgreSQL connection established");

    Ok(pool)
}

/// Create a pool that only connects on first use
pub fn create_lazy_pool(config: &DatabaseConfig) -> ApiResult<PgPool> {
    pool_options(config, &PoolOptions::default())
        .connect_lazy(&config.url)
        .map_err(ApiError::Database)
}

/// Run migrations embedded at compile time from ./migrations
pub async fn run_migrations(pool: &PgPool) -> ApiResult<()> {
    info!("Running PostgreSQL migrations...");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            ApiError::Internal(format!("Migration failed: {}", e))
        })?;

    info!("Migrations completed");

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &PgPool) -> ApiResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
