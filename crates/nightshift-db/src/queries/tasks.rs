//! Database query functions for the `tasks` table.
//!
//! Every statement is parameterized. Conditional state transitions (cancel,
//! retry scheduling, the dependency cascade) are single atomic UPDATEs whose
//! WHERE clause carries the precondition, so callers learn from the affected
//! row count whether the transition happened.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::models::{ErrorKind, NewTask, Task, TaskStatus};

/// Maximum stored length of the observational last-message snippet.
const LAST_MESSAGE_MAX_CHARS: usize = 1000;

/// Insert a new task row. Returns the inserted task.
pub async fn insert_task(pool: &SqlitePool, new: &NewTask) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (prompt, project_path, priority, created_by, source, \
                            depends_on, max_iterations, max_retries, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         RETURNING *",
    )
    .bind(&new.prompt)
    .bind(&new.project_path)
    .bind(new.priority)
    .bind(&new.created_by)
    .bind(new.source)
    .bind(new.depends_on)
    .bind(new.max_iterations)
    .bind(new.max_retries)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by id.
pub async fn get_task(pool: &SqlitePool, id: i64) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Fetch the currently running task, if any. At most one row can be running.
pub async fn get_running_task(pool: &SqlitePool) -> Result<Option<Task>> {
    let task =
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE status = 'running' LIMIT 1")
            .fetch_optional(pool)
            .await
            .context("failed to fetch running task")?;

    Ok(task)
}

/// Fetch the next eligible pending task.
///
/// Eligible means: retry_after is absent or elapsed, and the dependency (if
/// any) is done. Ordering is priority rank (urgent first) then FIFO on
/// created_at, with id as a final deterministic tiebreak.
pub async fn get_next_retryable(pool: &SqlitePool) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        "SELECT t.* FROM tasks t \
         WHERE t.status = 'pending' \
           AND (t.retry_after IS NULL OR t.retry_after <= ?) \
           AND (t.depends_on IS NULL OR EXISTS ( \
                SELECT 1 FROM tasks p WHERE p.id = t.depends_on AND p.status = 'done')) \
         ORDER BY CASE t.priority \
                    WHEN 'urgent' THEN 0 \
                    WHEN 'high' THEN 1 \
                    WHEN 'medium' THEN 2 \
                    ELSE 3 \
                  END, \
                  t.created_at ASC, \
                  t.id ASC \
         LIMIT 1",
    )
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
    .context("failed to fetch next retryable task")?;

    Ok(task)
}

/// Transition a task to running, recording the session handle and start time.
pub async fn set_running(pool: &SqlitePool, id: i64, session_id: &str) -> Result<()> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'running', session_id = ?, started_at = ? WHERE id = ?",
    )
    .bind(session_id)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .context("failed to set task running")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {id} not found");
    }

    Ok(())
}

/// Transition a task to done with its final output.
pub async fn set_done(pool: &SqlitePool, id: i64, result_text: &str) -> Result<()> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'done', result = ?, completed_at = ? WHERE id = ?",
    )
    .bind(result_text)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .context("failed to set task done")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {id} not found");
    }

    Ok(())
}

/// Transition a task to failed with a diagnostic and its classification.
pub async fn set_failed(
    pool: &SqlitePool,
    id: i64,
    error: &str,
    error_type: ErrorKind,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'failed', error = ?, error_type = ?, completed_at = ? \
         WHERE id = ?",
    )
    .bind(error)
    .bind(error_type)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .context("failed to set task failed")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {id} not found");
    }

    Ok(())
}

/// Cancel a pending task. Returns true iff the row was pending.
pub async fn cancel_task(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'cancelled', completed_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .context("failed to cancel task")?;

    Ok(result.rows_affected() > 0)
}

/// Recovery reset: put a task back to pending with a clean slate.
///
/// Clears the session handle, start time, and iteration counter. Used for
/// orphaned running tasks after a crash and for in-place recovery paths that
/// must not consume a retry.
pub async fn reset_to_pending(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET status = 'pending', session_id = NULL, started_at = NULL, \
                          iteration = 0 \
         WHERE id = ?",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to reset task to pending")?;

    Ok(())
}

/// Schedule a retry after `delay_seconds`.
///
/// Atomic: only applies while `retry_count < max_retries`. On success the
/// task returns to pending with an incremented retry counter, a fresh
/// iteration budget, and `retry_after` set; the previous error is cleared.
/// Returns false when the retry budget is exhausted.
pub async fn schedule_retry(pool: &SqlitePool, id: i64, delay_seconds: u64) -> Result<bool> {
    let retry_after = Utc::now() + Duration::seconds(delay_seconds as i64);

    let result = sqlx::query(
        "UPDATE tasks SET status = 'pending', \
                          retry_count = retry_count + 1, \
                          retry_after = ?, \
                          iteration = 0, \
                          session_id = NULL, \
                          started_at = NULL, \
                          error = NULL \
         WHERE id = ? AND status IN ('pending', 'running') \
           AND retry_count < max_retries",
    )
    .bind(retry_after)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to schedule retry")?;

    Ok(result.rows_affected() > 0)
}

/// Increment the iteration counter, returning the new value.
pub async fn increment_iteration(pool: &SqlitePool, id: i64) -> Result<i64> {
    let iteration: i64 = sqlx::query_scalar(
        "UPDATE tasks SET iteration = iteration + 1 WHERE id = ? RETURNING iteration",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .context("failed to increment iteration")?;

    Ok(iteration)
}

/// Record the runner session handle for a task.
pub async fn update_session_id(pool: &SqlitePool, id: i64, session_id: &str) -> Result<()> {
    sqlx::query("UPDATE tasks SET session_id = ? WHERE id = ?")
        .bind(session_id)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update session id")?;

    Ok(())
}

/// Observational progress counters captured while the runner is busy.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub tool_calls: i64,
    pub last_tool: Option<String>,
    pub last_message: Option<String>,
}

/// Persist progress counters. The last-message snippet is truncated to
/// [`LAST_MESSAGE_MAX_CHARS`].
pub async fn update_progress(pool: &SqlitePool, id: i64, progress: &ProgressUpdate) -> Result<()> {
    let last_message = progress
        .last_message
        .as_deref()
        .map(|m| truncate_chars(m, LAST_MESSAGE_MAX_CHARS));

    sqlx::query(
        "UPDATE tasks SET progress_tool_calls = ?, \
                          progress_last_tool = ?, \
                          progress_last_message = ?, \
                          progress_updated_at = ? \
         WHERE id = ?",
    )
    .bind(progress.tool_calls)
    .bind(&progress.last_tool)
    .bind(last_message)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update progress")?;

    Ok(())
}

/// Pending children of a task.
pub async fn get_dependent_tasks(pool: &SqlitePool, parent_id: i64) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE depends_on = ? AND status = 'pending' ORDER BY id ASC",
    )
    .bind(parent_id)
    .fetch_all(pool)
    .await
    .context("failed to fetch dependent tasks")?;

    Ok(tasks)
}

/// Fail every pending child of a failed parent in one atomic UPDATE.
///
/// Children are stamped with `error_type = dependency_failed`. Returns the
/// number of cascaded rows.
pub async fn fail_dependent_tasks(pool: &SqlitePool, parent_id: i64, reason: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'failed', error = ?, error_type = ?, completed_at = ? \
         WHERE depends_on = ? AND status = 'pending'",
    )
    .bind(reason)
    .bind(ErrorKind::DependencyFailed)
    .bind(Utc::now())
    .bind(parent_id)
    .execute(pool)
    .await
    .context("failed to cascade-fail dependent tasks")?;

    Ok(result.rows_affected())
}

/// List tasks, optionally filtered by status, newest first.
pub async fn list_tasks(
    pool: &SqlitePool,
    status: Option<TaskStatus>,
    limit: i64,
) -> Result<Vec<Task>> {
    let tasks = match status {
        Some(status) => {
            sqlx::query_as::<_, Task>(
                "SELECT * FROM tasks WHERE status = ? ORDER BY id DESC LIMIT ?",
            )
            .bind(status)
            .bind(limit)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY id DESC LIMIT ?")
                .bind(limit)
                .fetch_all(pool)
                .await
        }
    }
    .context("failed to list tasks")?;

    Ok(tasks)
}

/// Task counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub done: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}

/// Get a summary of task counts by status.
pub async fn queue_stats(pool: &SqlitePool) -> Result<QueueStats> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .fetch_all(pool)
            .await
            .context("failed to compute queue stats")?;

    let mut stats = QueueStats::default();
    for (status, count) in &rows {
        match status.as_str() {
            "pending" => stats.pending = *count,
            "running" => stats.running = *count,
            "done" => stats.done = *count,
            "failed" => stats.failed = *count,
            "cancelled" => stats.cancelled = *count,
            _ => {}
        }
        stats.total += count;
    }
    Ok(stats)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
