//! Daemon configuration.
//!
//! Every knob is an environment variable with a hard-coded default; the CLI
//! layers an optional TOML config file underneath the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Tunable timings and defaults for the daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// How long the scheduler sleeps when the queue is empty.
    pub poll_interval: Duration,
    /// Wall-time cap for a whole task (all iterations).
    pub task_timeout: Duration,
    /// Wall-time cap for a single iteration's poll loop.
    pub iteration_timeout: Duration,
    /// Grace period for the in-flight task on shutdown.
    pub shutdown_timeout: Duration,
    /// Default working directory when a task has no project_path.
    pub workspace: PathBuf,
    /// Logical agent name passed to the runner.
    pub agent: String,
    /// Specialist agent names advertised in the initial prompt.
    pub agents: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5_000),
            task_timeout: Duration::from_millis(1_800_000),
            iteration_timeout: Duration::from_millis(600_000),
            shutdown_timeout: Duration::from_millis(60_000),
            workspace: PathBuf::from("."),
            agent: "coder".to_owned(),
            agents: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Build a config from the environment over the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Overlay recognized `NIGHTSHIFT_*` environment variables onto `self`.
    pub fn apply_env(&mut self) {
        if let Some(ms) = env_ms("NIGHTSHIFT_POLL_INTERVAL_MS") {
            self.poll_interval = ms;
        }
        if let Some(ms) = env_ms("NIGHTSHIFT_TASK_TIMEOUT_MS") {
            self.task_timeout = ms;
        }
        if let Some(ms) = env_ms("NIGHTSHIFT_ITERATION_TIMEOUT_MS") {
            self.iteration_timeout = ms;
        }
        if let Some(ms) = env_ms("NIGHTSHIFT_SHUTDOWN_TIMEOUT_MS") {
            self.shutdown_timeout = ms;
        }
        if let Ok(dir) = env::var("NIGHTSHIFT_WORKSPACE") {
            self.workspace = PathBuf::from(dir);
        }
        if let Ok(agent) = env::var("NIGHTSHIFT_AGENT") {
            self.agent = agent;
        }
    }
}

fn env_ms(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
