//! Subprocess runner.
//!
//! Drives an agent CLI: short-lived invocations for session management and
//! transcript reads, and one long-lived `run` child per prompt whose exit
//! marks the session idle again. Children are tracked per session so
//! `get_status` can report busy/idle from `try_wait` and so [`CliRunner::kill_all`]
//! can terminate them on a forced shutdown; `kill_on_drop` backstops
//! abnormal teardown of the owning task.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::trait_def::Runner;
use super::types::{Message, RunnerError, SessionStatus, Todo};

/// Runner that shells out to an agent CLI binary.
#[derive(Clone)]
pub struct CliRunner {
    /// Path to the agent binary. Defaults to `"agent"` (found via `$PATH`).
    binary_path: String,
    /// In-flight `run` children, keyed by session id.
    running: Arc<Mutex<HashMap<String, Child>>>,
}

impl std::fmt::Debug for CliRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliRunner")
            .field("binary_path", &self.binary_path)
            .finish()
    }
}

impl CliRunner {
    /// Create a runner for the given agent binary.
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run a short-lived CLI invocation to completion and parse its stdout
    /// as JSON. A failing exit surfaces stderr as a [`RunnerError`], with
    /// the payload attached when stderr itself is JSON.
    async fn run_json(&self, work_dir: Option<&Path>, args: &[&str]) -> Result<serde_json::Value> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.args(args);
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.with_context(|| {
            format!(
                "failed to run agent CLI '{}' -- is it installed and on PATH?",
                self.binary_path
            )
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(cli_error(&output.status, &stderr).into());
        }

        serde_json::from_slice(&output.stdout).context("agent CLI produced malformed JSON")
    }

    /// Kill every in-flight `run` child: SIGTERM first, then SIGKILL for
    /// any that have not exited within a short grace window.
    ///
    /// Called on forced shutdown, where the process is about to exit
    /// without running destructors, so this must not rely on
    /// `kill_on_drop`.
    pub async fn kill_all(&self) {
        let mut running = self.running.lock().await;

        for (session_id, child) in running.iter_mut() {
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: pid belongs to a child we spawned.
                    let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                    if ret != 0 {
                        warn!(%session_id, pid, "SIGTERM failed, proceeding to SIGKILL");
                    }
                }
            }

            match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(%session_id, %status, "agent exited after SIGTERM");
                }
                _ => {
                    debug!(%session_id, "agent did not exit after SIGTERM, sending SIGKILL");
                    let _ = child.kill().await;
                }
            }
        }

        running.clear();
    }

    /// Reap an exited `run` child: read its stderr and convert a failing
    /// exit into an error.
    async fn reap(mut child: Child, session_id: &str) -> Result<()> {
        let status = child.wait().await.context("failed to reap agent child")?;

        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr).await;
        }
        let stderr = stderr.trim().to_owned();

        if status.success() {
            debug!(session_id, "agent run completed");
            Ok(())
        } else {
            warn!(session_id, %status, "agent run failed");
            Err(cli_error(&status, &stderr).into())
        }
    }
}

fn cli_error(status: &std::process::ExitStatus, stderr: &str) -> RunnerError {
    if let Ok(payload) = serde_json::from_str::<serde_json::Value>(stderr) {
        let message = crate::classify::normalize_error_value(&payload);
        return RunnerError::with_payload(message, payload);
    }
    if stderr.is_empty() {
        RunnerError::new(format!("agent CLI exited with {status}"))
    } else {
        RunnerError::new(stderr.to_owned())
    }
}

#[async_trait]
impl Runner for CliRunner {
    fn name(&self) -> &str {
        "cli"
    }

    async fn create_session(&self, work_dir: &Path, title: &str) -> Result<String> {
        let value = self
            .run_json(
                Some(work_dir),
                &["session", "create", "--title", title, "--json"],
            )
            .await?;

        value
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .context("session create response has no id")
    }

    async fn send_prompt(
        &self,
        session_id: &str,
        work_dir: &Path,
        agent: &str,
        text: &str,
    ) -> Result<()> {
        // One run child at a time per session.
        {
            let mut running = self.running.lock().await;
            if let Some(previous) = running.remove(session_id) {
                Self::reap(previous, session_id).await?;
            }
        }

        let mut cmd = Command::new(&self.binary_path);
        cmd.args(["run", "--session", session_id, "--agent", agent])
            .current_dir(work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn agent CLI '{}' -- is it installed and on PATH?",
                self.binary_path
            )
        })?;

        // The prompt goes in on stdin; closing it lets the agent start.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .context("failed to write prompt to agent stdin")?;
            drop(stdin);
        }

        self.running
            .lock()
            .await
            .insert(session_id.to_owned(), child);

        Ok(())
    }

    async fn get_status(&self, session_id: &str, _work_dir: &Path) -> Result<SessionStatus> {
        let mut running = self.running.lock().await;

        let Some(child) = running.get_mut(session_id) else {
            // No in-flight run child: nothing is working on this session.
            return Ok(SessionStatus::Idle);
        };

        match child.try_wait() {
            Ok(None) => Ok(SessionStatus::Busy),
            Ok(Some(_status)) => {
                if let Some(child) = running.remove(session_id) {
                    drop(running);
                    Self::reap(child, session_id).await?;
                }
                Ok(SessionStatus::Idle)
            }
            Err(e) => {
                running.remove(session_id);
                Err(anyhow::Error::new(e).context("failed to poll agent child"))
            }
        }
    }

    async fn get_messages(&self, session_id: &str, work_dir: &Path) -> Result<Vec<Message>> {
        let value = self
            .run_json(
                Some(work_dir),
                &["session", "messages", session_id, "--json"],
            )
            .await?;

        serde_json::from_value(value).context("agent CLI produced malformed messages")
    }

    async fn get_todos(&self, session_id: &str) -> Result<Vec<Todo>> {
        let value = self
            .run_json(None, &["session", "todos", session_id, "--json"])
            .await?;

        serde_json::from_value(value).context("agent CLI produced malformed todos")
    }

    async fn inject_tool_results(
        &self,
        session_id: &str,
        work_dir: &Path,
        pending_tool_ids: &[String],
    ) -> Result<()> {
        let mut args = vec!["session", "repair", session_id];
        for id in pending_tool_ids {
            args.push("--tool");
            args.push(id);
        }
        self.run_json(Some(work_dir), &args).await?;
        Ok(())
    }
}
