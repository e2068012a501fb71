//! Forward-only schema migrations.
//!
//! The base schema is created with `IF NOT EXISTS` guards; later evolution is
//! a fixed list of additive `ALTER TABLE ... ADD COLUMN` statements, each
//! tolerated when the column already exists. Columns are never dropped or
//! renamed.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, info};

/// Base schema. Safe to run on every start.
const BASE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    prompt          TEXT NOT NULL,
    project_path    TEXT,
    status          TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'running', 'done', 'failed', 'cancelled')),
    priority        TEXT NOT NULL DEFAULT 'medium'
                    CHECK (priority IN ('urgent', 'high', 'medium', 'low')),
    result          TEXT,
    error           TEXT,
    error_type      TEXT,
    session_id      TEXT,
    iteration       INTEGER NOT NULL DEFAULT 0,
    max_iterations  INTEGER NOT NULL DEFAULT 10,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    max_retries     INTEGER NOT NULL DEFAULT 3,
    retry_after     TEXT,
    created_at      TEXT NOT NULL,
    started_at      TEXT,
    completed_at    TEXT,
    created_by      TEXT NOT NULL DEFAULT '',
    source          TEXT NOT NULL DEFAULT 'cli'
                    CHECK (source IN ('discord', 'slack', 'cli'))
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_status_priority ON tasks(status, priority);
CREATE INDEX IF NOT EXISTS idx_tasks_retry_after ON tasks(retry_after);
";

/// Columns added after the initial release. Each entry is applied with a
/// duplicate-column guard so re-running is a no-op.
const ADDITIVE_COLUMNS: &[&str] = &[
    "ALTER TABLE tasks ADD COLUMN depends_on INTEGER",
    "ALTER TABLE tasks ADD COLUMN progress_tool_calls INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE tasks ADD COLUMN progress_last_tool TEXT",
    "ALTER TABLE tasks ADD COLUMN progress_last_message TEXT",
    "ALTER TABLE tasks ADD COLUMN progress_updated_at TEXT",
];

/// Apply the schema to the pool. Idempotent; called on every daemon start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(BASE_SCHEMA)
        .execute(pool)
        .await
        .context("failed to apply base schema")?;

    for stmt in ADDITIVE_COLUMNS {
        match sqlx::raw_sql(stmt).execute(pool).await {
            Ok(_) => debug!(stmt, "applied additive migration"),
            Err(e) if is_duplicate_column(&e) => {
                debug!(stmt, "column already present, skipping");
            }
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to apply migration: {stmt}"));
            }
        }
    }

    info!("migrations applied");
    Ok(())
}

fn is_duplicate_column(e: &sqlx::Error) -> bool {
    e.to_string().contains("duplicate column name")
}
