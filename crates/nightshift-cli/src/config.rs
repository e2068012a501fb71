//! Config file handling and layered resolution.
//!
//! Precedence, lowest to highest: built-in defaults, `config.toml` in the
//! data directory, `NIGHTSHIFT_*` environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use nightshift_core::config::DaemonConfig;
use nightshift_db::config::DbConfig;

/// On-disk config file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub runner: RunnerSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonSection {
    pub workspace: Option<String>,
    pub agent: Option<String>,
    /// Specialist agent names advertised to the main agent.
    #[serde(default)]
    pub agents: Vec<String>,
    pub poll_interval_ms: Option<u64>,
    pub task_timeout_ms: Option<u64>,
    pub iteration_timeout_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerSection {
    /// "http" or "cli".
    pub kind: Option<String>,
    /// Agent server base URL for the http runner.
    pub url: Option<String>,
    /// Agent CLI binary for the cli runner.
    pub bin: Option<String>,
}

/// Which runner implementation the daemon should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerChoice {
    Http { url: String },
    Cli { bin: String },
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub daemon: DaemonConfig,
    pub runner: RunnerChoice,
}

pub fn config_path(db_config: &DbConfig) -> PathBuf {
    db_config.data_dir().join("config.toml")
}

pub fn load_config(path: &Path) -> Result<Option<ConfigFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(Some(cfg))
}

pub fn save_config(path: &Path, cfg: &ConfigFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let contents = toml::to_string_pretty(cfg).context("failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

/// Resolve daemon settings: defaults, then config file, then environment.
pub fn resolve(db_config: &DbConfig) -> Result<Resolved> {
    let file = load_config(&config_path(db_config))?.unwrap_or_default();

    let mut daemon = DaemonConfig::default();
    if let Some(ws) = &file.daemon.workspace {
        daemon.workspace = PathBuf::from(ws);
    }
    if let Some(agent) = &file.daemon.agent {
        daemon.agent = agent.clone();
    }
    daemon.agents = file.daemon.agents.clone();
    if let Some(ms) = file.daemon.poll_interval_ms {
        daemon.poll_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = file.daemon.task_timeout_ms {
        daemon.task_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = file.daemon.iteration_timeout_ms {
        daemon.iteration_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = file.daemon.shutdown_timeout_ms {
        daemon.shutdown_timeout = Duration::from_millis(ms);
    }
    daemon.apply_env();

    let kind = env::var("NIGHTSHIFT_RUNNER")
        .ok()
        .or(file.runner.kind.clone())
        .unwrap_or_else(|| "http".to_owned());

    let runner = match kind.as_str() {
        "http" => RunnerChoice::Http {
            url: env::var("NIGHTSHIFT_RUNNER_URL")
                .ok()
                .or(file.runner.url.clone())
                .unwrap_or_else(|| "http://127.0.0.1:4096".to_owned()),
        },
        "cli" => RunnerChoice::Cli {
            bin: env::var("NIGHTSHIFT_RUNNER_BIN")
                .ok()
                .or(file.runner.bin.clone())
                .unwrap_or_else(|| "agent".to_owned()),
        },
        other => anyhow::bail!("unknown runner kind {other:?}, expected \"http\" or \"cli\""),
    };

    Ok(Resolved { daemon, runner })
}
