//! Error classification and retry policy.
//!
//! Runner failures arrive in many shapes: plain strings, anyhow chains, or
//! JSON payloads with nested `message`/`data`/`error` fields. Everything is
//! normalized to one lowercase string and matched against a fixed, ordered
//! rule table. The resulting [`ErrorKind`] decides retry vs. permanent
//! failure and the backoff delay.

use nightshift_db::models::ErrorKind;

use crate::runner::types::RunnerError;

/// Base retry delay in seconds; doubles per consumed retry.
pub const BACKOFF_BASE_SECS: u64 = 30;

/// Upper bound on any retry delay.
pub const BACKOFF_CAP_SECS: u64 = 600;

/// A classified failure, ready for the scheduler's retry decision.
#[derive(Debug, Clone)]
pub struct Classified {
    pub kind: ErrorKind,
    /// Normalized diagnostic stored in the task's `error` column.
    pub message: String,
    /// Server-provided retry-after hint in seconds, when the error payload
    /// carried one.
    pub retry_after_hint: Option<u64>,
}

/// Classify an error from the executor or a runner call.
///
/// Prefers the structured [`RunnerError`] payload when one is present in the
/// chain; otherwise matches on the formatted error text.
pub fn classify(err: &anyhow::Error) -> Classified {
    for cause in err.chain() {
        if let Some(runner_err) = cause.downcast_ref::<RunnerError>() {
            let message = match &runner_err.payload {
                Some(payload) => {
                    let normalized = normalize_error_value(payload);
                    if normalized.is_empty() {
                        runner_err.message.clone()
                    } else {
                        normalized
                    }
                }
                None => runner_err.message.clone(),
            };
            return Classified {
                kind: classify_message(&message),
                retry_after_hint: runner_err.payload.as_ref().and_then(retry_after_secs),
                message,
            };
        }
    }

    let message = format!("{err:#}");
    Classified {
        kind: classify_message(&message),
        message,
        retry_after_hint: None,
    }
}

/// First-match substring classification over a lowercased message.
///
/// Rule order matters: an error mentioning both a rate limit and a timeout
/// is a rate limit.
pub fn classify_message(message: &str) -> ErrorKind {
    let m = message.to_lowercase();

    if m.contains("rate") && m.contains("limit") {
        ErrorKind::RateLimit
    } else if m.contains("context")
        && (m.contains("length") || m.contains("window") || m.contains("exceeded"))
    {
        ErrorKind::ContextExceeded
    } else if m.contains("agent") && (m.contains("not found") || m.contains("undefined")) {
        ErrorKind::AgentNotFound
    } else if m.contains("tool_use") && m.contains("tool_result") {
        ErrorKind::ToolResultMissing
    } else if m.contains("thinking") && (m.contains("block") || m.contains("disabled")) {
        ErrorKind::ThinkingBlockError
    } else if m.contains("timeout") || m.contains("timed out") {
        ErrorKind::Timeout
    } else {
        ErrorKind::Unknown
    }
}

/// Flatten a dynamic error payload to a single message string.
///
/// Strings pass through; objects are probed for `message`, then `error`,
/// then `data`, recursively; anything else is rendered as JSON.
pub fn normalize_error_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => {
            for key in ["message", "error", "data"] {
                if let Some(inner) = map.get(key) {
                    let s = normalize_error_value(inner);
                    if !s.is_empty() {
                        return s;
                    }
                }
            }
            value.to_string()
        }
        other => other.to_string(),
    }
}

/// Whether this failure class can never succeed on retry.
pub fn is_permanent(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::ContextExceeded | ErrorKind::AgentNotFound)
}

/// Exponential backoff: 30, 60, 120, 240, 480, then capped at 600 seconds.
pub fn backoff_delay_seconds(retry_count: i64) -> u64 {
    let exp = retry_count.clamp(0, 32) as u32;
    BACKOFF_BASE_SECS
        .saturating_mul(1u64 << exp)
        .min(BACKOFF_CAP_SECS)
}

/// Pull a numeric retry-after hint (seconds) out of an error payload.
fn retry_after_secs(value: &serde_json::Value) -> Option<u64> {
    if let Some(secs) = value.get("retry_after").and_then(|v| v.as_u64()) {
        return Some(secs);
    }
    for key in ["error", "data"] {
        if let Some(inner) = value.get(key) {
            if let Some(secs) = retry_after_secs(inner) {
                return Some(secs);
            }
        }
    }
    None
}
