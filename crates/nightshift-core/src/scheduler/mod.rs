//! The scheduler: a single long-lived loop that feeds the executor.
//!
//! Strictly one task runs at a time. The loop picks the best eligible
//! pending task, runs it under the task-level timeout, and routes the
//! outcome: done, retry with backoff, or permanent failure with a
//! dependency cascade. Every transition is announced through the sink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nightshift_db::models::{ErrorKind, Task};
use nightshift_db::queries::tasks as task_db;

use crate::classify::{self, Classified};
use crate::executor::{Executor, transcript};
use crate::queue;
use crate::runner::Runner;
use crate::sink::{Event, Sink};

/// Scheduler timings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Wall-time cap for a whole task, all iterations included.
    pub task_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            task_timeout: Duration::from_secs(1800),
        }
    }
}

/// The single worker loop.
pub struct Scheduler {
    pool: SqlitePool,
    runner: Arc<dyn Runner>,
    executor: Executor,
    sink: Arc<Sink>,
    config: SchedulerConfig,
    /// Default working directory for tasks without a project_path.
    workspace: PathBuf,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        pool: SqlitePool,
        runner: Arc<dyn Runner>,
        executor: Executor,
        sink: Arc<Sink>,
        config: SchedulerConfig,
        workspace: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            runner,
            executor,
            sink,
            config,
            workspace,
            cancel,
        }
    }

    /// Run until cancelled. Database errors are fatal and bubble up; task
    /// failures are routed through the retry policy and never stop the
    /// loop.
    pub async fn run(&self) -> Result<()> {
        self.recover_orphans().await?;

        loop {
            if self.cancel.is_cancelled() {
                info!("scheduler stopping");
                return Ok(());
            }

            // Invariant: at most one task is ever running. A row here means
            // a concurrent mutation bug somewhere; don't make it worse.
            if let Some(running) = task_db::get_running_task(&self.pool).await? {
                warn!(task_id = running.id, "found a running task while idle, skipping tick");
                self.idle_sleep().await;
                continue;
            }

            let Some(task) = queue::get_next_retryable(&self.pool).await? else {
                self.idle_sleep().await;
                continue;
            };

            self.execute(task).await?;
        }
    }

    /// Crash recovery: a task left running by a previous process is reset
    /// to pending with a clean slate.
    async fn recover_orphans(&self) -> Result<()> {
        if let Some(orphan) = task_db::get_running_task(&self.pool).await? {
            warn!(task_id = orphan.id, "resetting orphaned running task from previous run");
            task_db::reset_to_pending(&self.pool, orphan.id).await?;
        }
        Ok(())
    }

    async fn idle_sleep(&self) {
        tokio::select! {
            () = tokio::time::sleep(self.config.poll_interval) => {}
            () = self.cancel.cancelled() => {}
        }
    }

    async fn execute(&self, task: Task) -> Result<()> {
        info!(
            task_id = task.id,
            priority = %task.priority,
            retry_count = task.retry_count,
            "task started"
        );
        self.sink.emit(&Event::started(&task)).await;

        let work_dir = task
            .project_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.workspace.clone());

        let outcome = tokio::time::timeout(
            self.config.task_timeout,
            self.executor.run_task(&task, &work_dir),
        )
        .await;

        match outcome {
            Ok(Ok(output)) => {
                task_db::set_done(&self.pool, task.id, &output).await?;
                info!(task_id = task.id, "task completed");
                let snapshot = self.snapshot(&task).await;
                self.sink.emit(&Event::completed(&snapshot, &output)).await;
            }
            Ok(Err(e)) => {
                self.handle_failure(&task, &work_dir, e).await?;
            }
            Err(_elapsed) => {
                let e = anyhow!(
                    "task timed out after {} ms",
                    self.config.task_timeout.as_millis()
                );
                self.handle_failure(&task, &work_dir, e).await?;
            }
        }

        Ok(())
    }

    /// Route a failure: one-shot tool-result recovery, then retry with
    /// backoff if the class and budget allow, otherwise permanent failure
    /// plus the dependency cascade.
    async fn handle_failure(
        &self,
        task: &Task,
        work_dir: &std::path::Path,
        err: anyhow::Error,
    ) -> Result<()> {
        let classified = classify::classify(&err);
        warn!(
            task_id = task.id,
            kind = %classified.kind,
            error = %classified.message,
            "task failed"
        );

        if classified.kind == ErrorKind::ToolResultMissing {
            match self.try_tool_result_recovery(task, work_dir).await {
                Ok(true) => {
                    info!(
                        task_id = task.id,
                        "injected missing tool results, task requeued without consuming a retry"
                    );
                    return Ok(());
                }
                Ok(false) => {
                    debug!(task_id = task.id, "tool result recovery not applicable");
                }
                Err(e) => {
                    warn!(task_id = task.id, error = %e, "tool result recovery failed");
                }
            }
        }

        if !classify::is_permanent(classified.kind) {
            let delay = retry_delay(task, &classified);
            if task_db::schedule_retry(&self.pool, task.id, delay).await? {
                info!(task_id = task.id, delay_seconds = delay, "retry scheduled");
                let snapshot = self.snapshot(task).await;
                self.sink
                    .emit(&Event::failed(&snapshot, &classified.message))
                    .await;
                return Ok(());
            }
            // Retry budget exhausted; fall through to permanent failure.
            warn!(task_id = task.id, max_retries = task.max_retries, "retry budget exhausted");
        }

        task_db::set_failed(&self.pool, task.id, &classified.message, classified.kind).await?;
        let cascaded =
            task_db::fail_dependent_tasks(&self.pool, task.id, "parent task failed").await?;
        if cascaded > 0 {
            warn!(task_id = task.id, cascaded, "failed dependent tasks");
        }

        let snapshot = self.snapshot(task).await;
        self.sink
            .emit(&Event::failed(&snapshot, &classified.message))
            .await;
        Ok(())
    }

    /// In-place recovery for a conversation wedged on a dangling tool call:
    /// backfill the missing tool results, then requeue the task without
    /// incrementing its retry counter.
    async fn try_tool_result_recovery(
        &self,
        task: &Task,
        work_dir: &std::path::Path,
    ) -> Result<bool> {
        let Some(current) = task_db::get_task(&self.pool, task.id).await? else {
            return Ok(false);
        };
        let Some(session_id) = current.session_id.as_deref() else {
            return Ok(false);
        };
        // The placeholder session recorded at loop start is not a real
        // conversation handle.
        if session_id.starts_with("loop-") {
            return Ok(false);
        }

        let messages = self.runner.get_messages(session_id, work_dir).await?;
        let pending = transcript::pending_tool_ids(&messages);
        if pending.is_empty() {
            return Ok(false);
        }

        self.runner
            .inject_tool_results(session_id, work_dir, &pending)
            .await?;
        task_db::reset_to_pending(&self.pool, task.id).await?;
        Ok(true)
    }

    /// Refetch the task for an accurate event snapshot, falling back to the
    /// caller's copy.
    async fn snapshot(&self, task: &Task) -> Task {
        match task_db::get_task(&self.pool, task.id).await {
            Ok(Some(fresh)) => fresh,
            _ => task.clone(),
        }
    }
}

/// Delay for the next retry: a server-provided rate-limit hint when there
/// is one, the exponential backoff formula otherwise.
fn retry_delay(task: &Task, classified: &Classified) -> u64 {
    match (classified.kind, classified.retry_after_hint) {
        (ErrorKind::RateLimit, Some(hint)) => hint.min(classify::BACKOFF_CAP_SECS),
        _ => classify::backoff_delay_seconds(task.retry_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightshift_db::models::{TaskPriority, TaskSource, TaskStatus};

    fn task_with_retries(retry_count: i64) -> Task {
        Task {
            id: 1,
            prompt: "p".into(),
            project_path: None,
            status: TaskStatus::Running,
            priority: TaskPriority::Medium,
            result: None,
            error: None,
            error_type: None,
            session_id: None,
            iteration: 0,
            max_iterations: 10,
            retry_count,
            max_retries: 3,
            retry_after: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            created_by: "test".into(),
            source: TaskSource::Cli,
            depends_on: None,
            progress_tool_calls: 0,
            progress_last_tool: None,
            progress_last_message: None,
            progress_updated_at: None,
        }
    }

    #[test]
    fn retry_delay_follows_backoff() {
        let classified = Classified {
            kind: ErrorKind::Timeout,
            message: "timed out".into(),
            retry_after_hint: None,
        };
        assert_eq!(retry_delay(&task_with_retries(0), &classified), 30);
        assert_eq!(retry_delay(&task_with_retries(2), &classified), 120);
    }

    #[test]
    fn rate_limit_hint_overrides_backoff() {
        let classified = Classified {
            kind: ErrorKind::RateLimit,
            message: "rate limit".into(),
            retry_after_hint: Some(45),
        };
        assert_eq!(retry_delay(&task_with_retries(0), &classified), 45);
    }

    #[test]
    fn rate_limit_hint_is_capped() {
        let classified = Classified {
            kind: ErrorKind::RateLimit,
            message: "rate limit".into(),
            retry_after_hint: Some(10_000),
        };
        assert_eq!(
            retry_delay(&task_with_retries(0), &classified),
            classify::BACKOFF_CAP_SECS
        );
    }

    #[test]
    fn hint_ignored_for_other_kinds() {
        let classified = Classified {
            kind: ErrorKind::Timeout,
            message: "timed out".into(),
            retry_after_hint: Some(45),
        };
        assert_eq!(retry_delay(&task_with_retries(1), &classified), 60);
    }
}
