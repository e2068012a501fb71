//! Process-level coordination: single-instance lock file and signal
//! handling.
//!
//! These are the only two pieces of process-wide state besides the database
//! pool. No other component touches the filesystem for coordination.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cleanup invoked on a second (force) signal, immediately before the
/// process exits: kill in-flight agent subprocesses. `process::exit` runs
/// no destructors, so anything that must die with the daemon has to be
/// killed here explicitly.
pub type ForceCleanup = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Upper bound on the force-cleanup sweep; a wedged kill must not keep the
/// process alive.
const FORCE_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Exclusive-instance lock backed by a pid file.
///
/// On acquisition: if the file exists and its pid is alive, refuse to start;
/// a dead pid means a stale file from a crash and is overwritten. The file
/// is unlinked on drop (clean exit); after a hard kill the next start
/// detects the dead pid and takes over.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Ok(contents) = fs::read_to_string(path) {
            if let Ok(pid) = contents.trim().parse::<i32>() {
                if pid_alive(pid) {
                    bail!(
                        "another instance is already running (pid {pid}); \
                         remove {} if this is stale",
                        path.display()
                    );
                }
                warn!(pid, path = %path.display(), "removing stale lock file");
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, std::process::id().to_string())
            .with_context(|| format!("failed to write lock file {}", path.display()))?;

        info!(path = %path.display(), "instance lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Signal-0 liveness probe.
#[cfg(unix)]
fn pid_alive(pid: i32) -> bool {
    // SAFETY: kill with signal 0 only performs the permission/existence
    // check; no signal is delivered.
    pid > 0 && unsafe { libc::kill(pid, 0) } == 0
}

#[cfg(not(unix))]
fn pid_alive(_pid: i32) -> bool {
    false
}

/// Install the two-stage shutdown handler.
///
/// First SIGINT/SIGTERM cancels the token: the scheduler stops picking
/// tasks and the in-flight task gets the shutdown grace period. A second
/// signal runs `force_cleanup` (bounded) to kill in-flight agent
/// subprocesses, then exits; the orphaned task is reset on next start.
pub fn spawn_signal_listener(cancel: CancellationToken, force_cleanup: Option<ForceCleanup>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };

        let mut got_first = false;
        loop {
            #[cfg(unix)]
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            #[cfg(not(unix))]
            {
                tokio::signal::ctrl_c().await.ok();
            }

            if got_first {
                warn!("second signal received, forcing exit");
                if let Some(cleanup) = &force_cleanup {
                    if tokio::time::timeout(FORCE_CLEANUP_TIMEOUT, cleanup())
                        .await
                        .is_err()
                    {
                        warn!("force cleanup timed out, exiting anyway");
                    }
                }
                std::process::exit(130);
            }
            got_first = true;
            info!("shutdown signal received, finishing in-flight task (signal again to force)");
            cancel.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_own_pid() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.lock");

        let lock = InstanceLock::acquire(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());
        drop(lock);

        assert!(!path.exists(), "lock file should be removed on drop");
    }

    #[test]
    fn live_pid_refuses_second_acquire() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.lock");

        // Our own pid is certainly alive.
        fs::write(&path, std::process::id().to_string()).unwrap();
        let result = InstanceLock::acquire(&path);
        assert!(result.is_err());
        assert!(path.exists());
    }

    #[test]
    fn stale_pid_is_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.lock");

        // A pid that cannot be running. Linux pids max out well below this.
        fs::write(&path, "999999999").unwrap();
        let lock = InstanceLock::acquire(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());
        drop(lock);
    }

    #[test]
    fn garbage_lock_content_is_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.lock");

        fs::write(&path, "not a pid").unwrap();
        let _lock = InstanceLock::acquire(&path).unwrap();
    }
}
