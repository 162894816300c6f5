//! Pool creation and migration bootstrap: a connection pool plus
//! `sqlx::migrate!` bootstrap against Postgres.

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::Result;

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&config.connection_url())
        .await?;
    Ok(pool)
}

/// Runs the versioned migrations under `migrations/`. Idempotent: safe to
/// call on every startup.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| crate::Error::Config(format!("migration failed: {e}")))?;
    Ok(())
}
