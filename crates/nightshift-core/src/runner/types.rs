//! Wire types shared by every runner implementation.

use serde::{Deserialize, Serialize};

/// Who produced a message in the session transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One content block within a message.
///
/// `text`, `reasoning`, `tool_use` and `tool_result` are the minimal part
/// kinds of the runner contract; anything else an agent emits decodes to
/// [`Part::Unknown`] and is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: String,
    },
    #[serde(other)]
    Unknown,
}

/// A message in a session transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Status of a todo list entry. Anything other than `completed` or
/// `cancelled` counts as still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Todo,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// An entry in the agent's todo list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub status: TodoStatus,
    #[serde(default)]
    pub content: String,
}

/// Coarse session state reported by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Busy,
}

/// Error raised by a runner call.
///
/// Carries the agent side's error payload when one was available, so the
/// classifier can dig through nested `message`/`data`/`error` shapes.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct RunnerError {
    pub message: String,
    pub payload: Option<serde_json::Value>,
}

impl RunnerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(message: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            message: message.into(),
            payload: Some(payload),
        }
    }
}
