use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

use crate::config::DbConfig;
use crate::migrate;

/// Create a connection pool against the on-disk database, creating the file
/// if necessary and running migrations.
///
/// The database runs in WAL mode with a bounded busy timeout so the single
/// scheduler writer and ingress adapters can share it without hand-rolled
/// locking.
pub async fn create_pool(config: &DbConfig) -> Result<SqlitePool> {
    std::fs::create_dir_all(config.data_dir()).with_context(|| {
        format!("failed to create data dir {}", config.data_dir().display())
    })?;

    let options = SqliteConnectOptions::new()
        .filename(config.database_path())
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .with_context(|| {
            format!(
                "failed to open database at {}",
                config.database_path().display()
            )
        })?;

    migrate::run_migrations(&pool).await?;

    info!(db = %config.database_path().display(), "database ready");
    Ok(pool)
}

/// Create an in-memory pool with migrations applied.
///
/// A single connection is pinned for the pool's lifetime; dropping the last
/// connection would discard the database.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("failed to open in-memory database")?;

    migrate::run_migrations(&pool).await?;
    Ok(pool)
}
