//! The `Runner` trait -- the adapter interface for agent runtimes.
//!
//! The trait is intentionally object-safe so the executor and scheduler can
//! hold an `Arc<dyn Runner>` without knowing which adapter is behind it.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use super::types::{Message, SessionStatus, Todo};

/// Adapter interface for driving an external conversational coding agent.
///
/// One session corresponds to one agent conversation; a task holds a single
/// session across all of its continuation iterations. All calls are
/// request/response -- the executor polls `get_status` rather than consuming
/// a push stream, because the agent's completion signal is observationally
/// incomplete and must be corroborated.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Human-readable name for this runner (e.g. "http", "cli").
    fn name(&self) -> &str;

    /// Create a new conversation, returning its opaque session handle.
    async fn create_session(&self, work_dir: &Path, title: &str) -> Result<String>;

    /// Send a prompt into a session. Returns as soon as the agent has
    /// accepted the prompt; completion is observed via `get_status`.
    async fn send_prompt(
        &self,
        session_id: &str,
        work_dir: &Path,
        agent: &str,
        text: &str,
    ) -> Result<()>;

    /// Coarse session state: busy while the agent is working.
    async fn get_status(&self, session_id: &str, work_dir: &Path) -> Result<SessionStatus>;

    /// Ordered transcript of the session so far.
    async fn get_messages(&self, session_id: &str, work_dir: &Path) -> Result<Vec<Message>>;

    /// The agent's todo list for the session.
    async fn get_todos(&self, session_id: &str) -> Result<Vec<Todo>>;

    /// Recovery hook: backfill tool results for dangling tool calls so a
    /// wedged conversation can continue.
    async fn inject_tool_results(
        &self,
        session_id: &str,
        work_dir: &Path,
        pending_tool_ids: &[String],
    ) -> Result<()>;
}

// Compile-time assertion: Runner must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Runner) {}
};
