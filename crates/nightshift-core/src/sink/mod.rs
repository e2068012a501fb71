//! Lifecycle event fan-out.
//!
//! The scheduler emits one event per lifecycle transition; every registered
//! observer gets it. Observer failures and timeouts are collected and
//! logged, never propagated -- a broken notifier must not block another or
//! stall the scheduler beyond its own declared timeout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use nightshift_db::models::Task;

/// Default per-observer timeout when none is given at registration.
pub const DEFAULT_OBSERVER_TIMEOUT: Duration = Duration::from_secs(10);

/// The kind of lifecycle transition being announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Completed,
    Failed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A lifecycle event: the transition kind, a full task snapshot, and the
/// result or error text when there is one.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub task: Task,
    pub detail: Option<String>,
}

impl Event {
    pub fn started(task: &Task) -> Self {
        Self {
            kind: EventKind::Started,
            task: task.clone(),
            detail: None,
        }
    }

    pub fn completed(task: &Task, result: &str) -> Self {
        Self {
            kind: EventKind::Completed,
            task: task.clone(),
            detail: Some(result.to_owned()),
        }
    }

    pub fn failed(task: &Task, error: &str) -> Self {
        Self {
            kind: EventKind::Failed,
            task: task.clone(),
            detail: Some(error.to_owned()),
        }
    }
}

/// A notification target (chat adapter, webhook, log).
#[async_trait]
pub trait Observer: Send + Sync {
    /// Name used in diagnostics when this observer misbehaves.
    fn name(&self) -> &str;

    async fn notify(&self, event: &Event) -> Result<()>;
}

/// Fan-out of lifecycle events to registered observers.
#[derive(Default)]
pub struct Sink {
    observers: Vec<(Arc<dyn Observer>, Duration)>,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer with its own delivery timeout.
    pub fn register(&mut self, observer: Arc<dyn Observer>, timeout: Duration) {
        self.observers.push((observer, timeout));
    }

    /// Deliver an event to every observer concurrently.
    ///
    /// Each observer runs under its own timeout; errors are logged and
    /// swallowed.
    pub async fn emit(&self, event: &Event) {
        let deliveries = self.observers.iter().map(|(observer, timeout)| async move {
            match tokio::time::timeout(*timeout, observer.notify(event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        observer = observer.name(),
                        task_id = event.task.id,
                        error = %e,
                        "observer failed"
                    );
                }
                Err(_) => {
                    warn!(
                        observer = observer.name(),
                        task_id = event.task.id,
                        "observer timed out"
                    );
                }
            }
        });

        futures::future::join_all(deliveries).await;
    }
}

/// Default observer: writes every event to the structured log.
pub struct LogObserver;

#[async_trait]
impl Observer for LogObserver {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        info!(
            task_id = event.task.id,
            kind = %event.kind,
            detail = event.detail.as_deref().unwrap_or(""),
            "task event"
        );
        Ok(())
    }
}
