//! The executor: drives one task through potentially many continuation
//! iterations sharing a single agent session, until genuine completion.
//!
//! The agent's completion contract is observationally incomplete (idle too
//! early, idle with no output, idle with open todos, or never idle at all),
//! so each iteration corroborates completion with independent checks: idle
//! status, minimum session age, validated real output, an empty todo list,
//! and a transcript-stability heuristic for when idle is never reported.

pub mod completion;
pub mod prompts;
pub mod transcript;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use nightshift_db::models::Task;
use nightshift_db::queries::tasks as task_db;

use crate::runner::types::Message;
use crate::runner::{Runner, SessionStatus};

/// Timings and thresholds for the iteration poll loop.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wall-time cap for one iteration's poll loop.
    pub iteration_timeout: Duration,
    /// Sleep between status polls.
    pub poll_interval: Duration,
    /// Sleep between continuation iterations.
    pub loop_pause: Duration,
    /// Ignore idle reports from a session younger than this; fresh sessions
    /// can flap idle before the prompt lands.
    pub session_warmup: Duration,
    /// Minimum session age before the stability heuristic may trigger.
    pub stability_min_age: Duration,
    /// Consecutive unchanged-transcript polls that count as implicit idle.
    pub stability_polls: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            iteration_timeout: Duration::from_millis(600_000),
            poll_interval: Duration::from_secs(2),
            loop_pause: Duration::from_secs(2),
            session_warmup: Duration::from_secs(5),
            stability_min_age: Duration::from_secs(10),
            stability_polls: 3,
        }
    }
}

/// What one iteration observed.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub output: String,
    pub session_id: String,
    pub is_complete: bool,
    pub needs_continuation: bool,
}

/// Drives tasks against a runner. One instance serves the whole daemon.
pub struct Executor {
    pool: SqlitePool,
    runner: Arc<dyn Runner>,
    config: ExecutorConfig,
    /// Logical agent name passed on every prompt.
    agent: String,
    /// Specialist agents advertised in the initial prompt.
    agent_names: Vec<String>,
}

impl Executor {
    pub fn new(
        pool: SqlitePool,
        runner: Arc<dyn Runner>,
        config: ExecutorConfig,
        agent: String,
        agent_names: Vec<String>,
    ) -> Self {
        Self {
            pool,
            runner,
            config,
            agent,
            agent_names,
        }
    }

    /// Run a task to completion, returning its final output.
    ///
    /// Marks the task running, then loops: bump the iteration counter, run
    /// one iteration, and continue while the agent signals unfinished work.
    /// Exhausting `max_iterations` returns a sentinel result rather than an
    /// error. Runner failures and iteration timeouts propagate to the
    /// scheduler for classification.
    pub async fn run_task(&self, task: &Task, work_dir: &Path) -> Result<String> {
        let placeholder = format!("loop-{}", Utc::now().timestamp_millis());
        task_db::set_running(&self.pool, task.id, &placeholder).await?;

        info!(
            task_id = task.id,
            work_dir = %work_dir.display(),
            runner = self.runner.name(),
            "executing task"
        );

        let mut session_id: Option<String> = None;
        let mut last_output = String::new();

        loop {
            let n = task_db::increment_iteration(&self.pool, task.id).await?;
            if n > task.max_iterations {
                warn!(
                    task_id = task.id,
                    max_iterations = task.max_iterations,
                    "iteration budget exhausted"
                );
                return Ok(format!("Max iterations reached. Last output:\n{last_output}"));
            }

            let prompt = if n == 1 {
                prompts::initial_prompt(&task.prompt, &self.agent_names)
            } else {
                prompts::continuation_prompt().to_owned()
            };

            debug!(task_id = task.id, iteration = n, "starting iteration");
            let outcome = self
                .run_iteration(task.id, work_dir, &prompt, session_id.clone())
                .await?;

            last_output = outcome.output.clone();
            session_id = Some(outcome.session_id.clone());

            if outcome.is_complete {
                info!(task_id = task.id, iteration = n, "task complete");
                return Ok(outcome.output);
            }
            if !outcome.needs_continuation {
                info!(
                    task_id = task.id,
                    iteration = n,
                    "no further work signalled, finishing"
                );
                return Ok(outcome.output);
            }

            tokio::time::sleep(self.config.loop_pause).await;
        }
    }

    /// One prompt/response round: send the prompt, then poll the session
    /// until it settles or the iteration deadline passes.
    async fn run_iteration(
        &self,
        task_id: i64,
        work_dir: &Path,
        prompt: &str,
        session_id: Option<String>,
    ) -> Result<IterationOutcome> {
        let (session_id, session_is_new) = match session_id {
            Some(existing) => (existing, false),
            None => {
                let title = format!("Task #{task_id}");
                let created = self
                    .runner
                    .create_session(work_dir, &title)
                    .await
                    .context("failed to create agent session")?;
                task_db::update_session_id(&self.pool, task_id, &created).await?;
                (created, true)
            }
        };
        let session_created = Instant::now();

        self.runner
            .send_prompt(&session_id, work_dir, &self.agent, prompt)
            .await
            .context("failed to send prompt")?;

        let deadline = Instant::now() + self.config.iteration_timeout;
        let mut stable_polls: u32 = 0;
        let mut last_message_count: Option<usize> = None;

        loop {
            if Instant::now() >= deadline {
                bail!(
                    "iteration timed out after {} ms",
                    self.config.iteration_timeout.as_millis()
                );
            }
            tokio::time::sleep(self.config.poll_interval).await;

            match self.runner.get_status(&session_id, work_dir).await? {
                SessionStatus::Idle => {
                    if session_is_new && session_created.elapsed() < self.config.session_warmup {
                        continue;
                    }
                    let messages = self.runner.get_messages(&session_id, work_dir).await?;
                    if !transcript::has_real_output(&messages) {
                        continue;
                    }
                    return self.settle(&session_id, &messages).await;
                }
                SessionStatus::Busy => {
                    let messages = self.runner.get_messages(&session_id, work_dir).await?;

                    let progress = transcript::progress_from(&messages);
                    if let Err(e) = task_db::update_progress(&self.pool, task_id, &progress).await
                    {
                        warn!(task_id, error = %e, "failed to persist progress (best-effort)");
                    }

                    let old_enough = !session_is_new
                        || session_created.elapsed() >= self.config.stability_min_age;
                    if old_enough && last_message_count == Some(messages.len()) {
                        stable_polls += 1;
                    } else {
                        stable_polls = 0;
                    }
                    last_message_count = Some(messages.len());

                    if stable_polls >= self.config.stability_polls {
                        // The transcript stopped moving while the runner
                        // still reports busy: treat as implicit idle.
                        debug!(task_id, "transcript stable, treating as implicit idle");
                        if !transcript::has_real_output(&messages) {
                            stable_polls = 0;
                            continue;
                        }
                        return self.settle(&session_id, &messages).await;
                    }
                }
            }
        }
    }

    /// The shared idle-branch tail: open todos force a continuation,
    /// otherwise the textual heuristics decide.
    async fn settle(&self, session_id: &str, messages: &[Message]) -> Result<IterationOutcome> {
        let output = transcript::extract_output(messages);

        let todos = self.runner.get_todos(session_id).await?;
        if todos.iter().any(|t| !t.status.is_terminal()) {
            return Ok(IterationOutcome {
                output,
                session_id: session_id.to_owned(),
                is_complete: false,
                needs_continuation: true,
            });
        }

        let is_complete = completion::is_complete(&output);
        let needs_continuation = completion::needs_continuation(
            &output,
            transcript::had_tool_activity(messages),
            is_complete,
        );

        Ok(IterationOutcome {
            output,
            session_id: session_id.to_owned(),
            is_complete,
            needs_continuation,
        })
    }
}
