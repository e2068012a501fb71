//! The `nightshift run` command: wire everything up and run the scheduler
//! until a shutdown signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nightshift_core::config::DaemonConfig;
use nightshift_core::executor::{Executor, ExecutorConfig};
use nightshift_core::lifecycle::{ForceCleanup, InstanceLock, spawn_signal_listener};
use nightshift_core::runner::{CliRunner, HttpRunner, Runner};
use nightshift_core::scheduler::{Scheduler, SchedulerConfig};
use nightshift_core::sink::{DEFAULT_OBSERVER_TIMEOUT, LogObserver, Sink};
use nightshift_db::config::DbConfig;
use nightshift_db::pool;

use crate::config::{Resolved, RunnerChoice};

pub async fn run_daemon(db_config: &DbConfig, resolved: Resolved) -> Result<()> {
    // The lock comes first: refuse to even open the database when another
    // instance is alive.
    let lock = InstanceLock::acquire(&db_config.lock_path())?;

    let db_pool = pool::create_pool(db_config).await?;

    // The force-shutdown path exits without running destructors, so the
    // cli runner hands the signal listener an explicit kill sweep for its
    // in-flight agent children. The http runner's agents live server-side.
    let (runner, force_cleanup): (Arc<dyn Runner>, Option<ForceCleanup>) = match &resolved.runner {
        RunnerChoice::Http { url } => {
            info!(url, "using http runner");
            (Arc::new(HttpRunner::new(url.clone())), None)
        }
        RunnerChoice::Cli { bin } => {
            info!(bin, "using cli runner");
            let cli = Arc::new(CliRunner::new(bin.clone()));
            let for_cleanup = Arc::clone(&cli);
            let cleanup: ForceCleanup = Arc::new(move || {
                let runner = Arc::clone(&for_cleanup);
                Box::pin(async move { runner.kill_all().await })
            });
            (cli, Some(cleanup))
        }
    };

    let mut sink = Sink::new();
    sink.register(Arc::new(LogObserver), DEFAULT_OBSERVER_TIMEOUT);
    let sink = Arc::new(sink);

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone(), force_cleanup);

    let DaemonConfig {
        poll_interval,
        task_timeout,
        iteration_timeout,
        shutdown_timeout,
        workspace,
        agent,
        agents,
    } = resolved.daemon;

    let executor = Executor::new(
        db_pool.clone(),
        Arc::clone(&runner),
        ExecutorConfig {
            iteration_timeout,
            ..ExecutorConfig::default()
        },
        agent,
        agents,
    );

    let scheduler = Scheduler::new(
        db_pool.clone(),
        runner,
        executor,
        sink,
        SchedulerConfig {
            poll_interval,
            task_timeout,
        },
        workspace,
        cancel.clone(),
    );

    info!("daemon started");
    let mut scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    tokio::select! {
        joined = &mut scheduler_handle => {
            joined.context("scheduler panicked")??;
        }
        () = cancel.cancelled() => {
            info!(
                grace_ms = shutdown_timeout.as_millis() as u64,
                "waiting for in-flight task before exit"
            );
            match tokio::time::timeout(shutdown_timeout, &mut scheduler_handle).await {
                Ok(joined) => {
                    joined.context("scheduler panicked")??;
                    info!("clean shutdown");
                }
                Err(_) => {
                    warn!(
                        "shutdown grace period elapsed; exiting -- the in-flight \
                         task will be reset on next start"
                    );
                    scheduler_handle.abort();
                }
            }
        }
    }

    db_pool.close().await;
    drop(lock);
    Ok(())
}
