//! Read-side helpers over a session transcript.

use nightshift_db::queries::tasks::ProgressUpdate;

use crate::runner::types::{Message, Part, Role};

/// Sentinel returned when a completed session produced no assistant text.
pub const NO_OUTPUT_SENTINEL: &str = "Task completed (no output captured)";

/// Concatenate the text of every assistant message, blank-line separated.
pub fn extract_output(messages: &[Message]) -> String {
    let chunks: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.parts.iter())
        .filter_map(|p| match p {
            Part::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        })
        .collect();

    if chunks.is_empty() {
        NO_OUTPUT_SENTINEL.to_owned()
    } else {
        chunks.join("\n\n")
    }
}

/// Whether the session produced any real output.
///
/// Guards against the runner reporting idle before the agent actually did
/// anything: at least one assistant or tool message must carry a non-empty
/// text/reasoning part or any tool part.
pub fn has_real_output(messages: &[Message]) -> bool {
    messages
        .iter()
        .filter(|m| matches!(m.role, Role::Assistant | Role::Tool))
        .any(|m| {
            m.parts.iter().any(|p| match p {
                Part::Text { text } | Part::Reasoning { text } => !text.trim().is_empty(),
                Part::ToolUse { .. } | Part::ToolResult { .. } => true,
                Part::Unknown => false,
            })
        })
}

/// Whether any tool was invoked anywhere in the transcript.
pub fn had_tool_activity(messages: &[Message]) -> bool {
    messages.iter().any(|m| {
        m.parts
            .iter()
            .any(|p| matches!(p, Part::ToolUse { .. } | Part::ToolResult { .. }))
    })
}

/// Observational progress counters for the busy-poll branch.
///
/// tool_calls counts tool_use parts across assistant messages; last_tool and
/// last_message are the most recent of each.
pub fn progress_from(messages: &[Message]) -> ProgressUpdate {
    let mut tool_calls = 0;
    let mut last_tool = None;
    let mut last_message = None;

    for message in messages.iter().filter(|m| m.role == Role::Assistant) {
        for part in &message.parts {
            match part {
                Part::ToolUse { name, .. } => {
                    tool_calls += 1;
                    last_tool = Some(name.clone());
                }
                Part::Text { text } if !text.trim().is_empty() => {
                    last_message = Some(text.clone());
                }
                _ => {}
            }
        }
    }

    ProgressUpdate {
        tool_calls,
        last_tool,
        last_message,
    }
}

/// Tool calls that never received a result -- the repair list for
/// `inject_tool_results`.
pub fn pending_tool_ids(messages: &[Message]) -> Vec<String> {
    let mut pending = Vec::new();
    for message in messages {
        for part in &message.parts {
            match part {
                Part::ToolUse { id, .. } => pending.push(id.clone()),
                Part::ToolResult { tool_use_id, .. } => {
                    pending.retain(|p| p != tool_use_id);
                }
                _ => {}
            }
        }
    }
    pending
}
