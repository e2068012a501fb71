use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Priority of a task -- the primary ordering key of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Urgent,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    /// Numeric rank used for queue ordering. Smaller runs first.
    pub fn rank(self) -> i64 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskPriority {
    type Err = TaskPriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urgent" => Ok(Self::Urgent),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(TaskPriorityParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskPriority`] string.
#[derive(Debug, Clone)]
pub struct TaskPriorityParseError(pub String);

impl fmt::Display for TaskPriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task priority: {:?}", self.0)
    }
}

impl std::error::Error for TaskPriorityParseError {}

// ---------------------------------------------------------------------------

/// Where a task was submitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Discord,
    Slack,
    Cli,
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discord => "discord",
            Self::Slack => "slack",
            Self::Cli => "cli",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskSource {
    type Err = TaskSourceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discord" => Ok(Self::Discord),
            "slack" => Ok(Self::Slack),
            "cli" => Ok(Self::Cli),
            other => Err(TaskSourceParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskSource`] string.
#[derive(Debug, Clone)]
pub struct TaskSourceParseError(pub String);

impl fmt::Display for TaskSourceParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task source: {:?}", self.0)
    }
}

impl std::error::Error for TaskSourceParseError {}

// ---------------------------------------------------------------------------

/// Machine-readable classification of a task failure.
///
/// This is the closed taxonomy stored in the `error_type` column and produced
/// by the error classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    ContextExceeded,
    AgentNotFound,
    ToolResultMissing,
    ThinkingBlockError,
    Timeout,
    DependencyFailed,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimit => "rate_limit",
            Self::ContextExceeded => "context_exceeded",
            Self::AgentNotFound => "agent_not_found",
            Self::ToolResultMissing => "tool_result_missing",
            Self::ThinkingBlockError => "thinking_block_error",
            Self::Timeout => "timeout",
            Self::DependencyFailed => "dependency_failed",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for ErrorKind {
    type Err = ErrorKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rate_limit" => Ok(Self::RateLimit),
            "context_exceeded" => Ok(Self::ContextExceeded),
            "agent_not_found" => Ok(Self::AgentNotFound),
            "tool_result_missing" => Ok(Self::ToolResultMissing),
            "thinking_block_error" => Ok(Self::ThinkingBlockError),
            "timeout" => Ok(Self::Timeout),
            "dependency_failed" => Ok(Self::DependencyFailed),
            "unknown" => Ok(Self::Unknown),
            other => Err(ErrorKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ErrorKind`] string.
#[derive(Debug, Clone)]
pub struct ErrorKindParseError(pub String);

impl fmt::Display for ErrorKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error kind: {:?}", self.0)
    }
}

impl std::error::Error for ErrorKindParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A task -- one user request tracked end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub prompt: String,
    pub project_path: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub result: Option<String>,
    pub error: Option<String>,
    pub error_type: Option<ErrorKind>,
    pub session_id: Option<String>,
    pub iteration: i64,
    pub max_iterations: i64,
    pub retry_count: i64,
    pub max_retries: i64,
    pub retry_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub source: TaskSource,
    pub depends_on: Option<i64>,
    pub progress_tool_calls: i64,
    pub progress_last_tool: Option<String>,
    pub progress_last_message: Option<String>,
    pub progress_updated_at: Option<DateTime<Utc>>,
}

/// Fields supplied by an ingress adapter when enqueueing a task.
///
/// Everything else (id, status, counters, timestamps) is assigned on insert.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub prompt: String,
    pub project_path: Option<String>,
    pub priority: TaskPriority,
    pub created_by: String,
    pub source: TaskSource,
    pub depends_on: Option<i64>,
    pub max_iterations: i64,
    pub max_retries: i64,
}

impl NewTask {
    /// A task with default knobs: medium priority, 10 iterations, 3 retries.
    pub fn new(prompt: impl Into<String>, created_by: impl Into<String>, source: TaskSource) -> Self {
        Self {
            prompt: prompt.into(),
            project_path: None,
            priority: TaskPriority::Medium,
            created_by: created_by.into(),
            source,
            depends_on: None,
            max_iterations: 10,
            max_retries: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
