//! The validated queue API used by ingress adapters and the scheduler.
//!
//! Raw SQL lives in `nightshift-db`; this module adds admission validation
//! (prompt bounds, the project path guard) and re-exports the rest of the
//! operations so callers have a single surface.

use anyhow::{Result, bail};
use sqlx::SqlitePool;

use nightshift_db::models::{NewTask, Task};
use nightshift_db::queries::tasks as task_db;

pub use nightshift_db::queries::tasks::{
    ProgressUpdate, QueueStats, cancel_task, fail_dependent_tasks, get_dependent_tasks,
    get_next_retryable, get_running_task, get_task, increment_iteration, list_tasks,
    queue_stats, reset_to_pending, schedule_retry, set_done, set_failed, set_running,
    update_progress, update_session_id,
};

/// Maximum accepted prompt length, in characters.
pub const PROMPT_MAX_CHARS: usize = 10_000;

/// Maximum accepted project path length, in characters.
const PATH_MAX_CHARS: usize = 500;

/// Path prefixes a task may never use as its working directory.
const FORBIDDEN_PREFIXES: &[&str] = &["/etc", "/var/log", "/proc", "/sys"];

/// Validate and enqueue a task. Returns the inserted row.
///
/// Validation failures are synchronous so adapters can surface them to the
/// submitting user directly.
pub async fn create(pool: &SqlitePool, new: NewTask) -> Result<Task> {
    validate_prompt(&new.prompt)?;
    if let Some(path) = new.project_path.as_deref() {
        validate_project_path(path)?;
    }
    if let Some(parent_id) = new.depends_on {
        if task_db::get_task(pool, parent_id).await?.is_none() {
            bail!("dependency task {parent_id} does not exist");
        }
    }
    if new.max_iterations <= 0 {
        bail!("max_iterations must be positive");
    }
    if new.max_retries < 0 {
        bail!("max_retries must not be negative");
    }

    task_db::insert_task(pool, &new).await
}

/// Check prompt bounds: non-blank after trim, at most [`PROMPT_MAX_CHARS`].
pub fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        bail!("prompt must not be empty");
    }
    let len = prompt.chars().count();
    if len > PROMPT_MAX_CHARS {
        bail!("prompt is {len} characters, maximum is {PROMPT_MAX_CHARS}");
    }
    Ok(())
}

/// The project path guard.
///
/// Rejects traversal (`..`), system directories, everything under `/root`
/// except `/root/projects`, and overlong paths.
pub fn validate_project_path(path: &str) -> Result<()> {
    if path.chars().count() > PATH_MAX_CHARS {
        bail!("project path exceeds {PATH_MAX_CHARS} characters");
    }
    if path.contains("..") {
        bail!("project path must not contain '..'");
    }
    for prefix in FORBIDDEN_PREFIXES {
        if has_path_prefix(path, prefix) {
            bail!("project path under {prefix} is not allowed");
        }
    }
    if has_path_prefix(path, "/root") && !has_path_prefix(path, "/root/projects") {
        bail!("project path under /root is not allowed (except /root/projects)");
    }
    Ok(())
}

/// Component-aware prefix test: `/etc` matches `/etc` and `/etc/passwd` but
/// not `/etcetera`.
fn has_path_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
