//! Textual completion and continuation heuristics.
//!
//! These run over natural-language agent output, so they are kept as plain
//! phrase tables rather than scattered literals. All matching is
//! case-insensitive. The order rule in [`is_complete`] distinguishes "done,
//! then kept going" from "still planning": a weak claim of completion is
//! discounted when a planning phrase appears after the last "complete".

/// Presence of any of these means the task is done, full stop.
const STRONG_SIGNALS: &[&str] = &["[task_complete]", "todos completed:", "all todos completed"];

/// Claims of completion that need corroboration.
const WEAK_SIGNALS: &[&str] = &[
    "task complete",
    "task completed",
    "successfully completed",
    "all done",
    "finished successfully",
    "completed successfully",
    "nothing left to do",
    "all steps completed",
];

/// Phrases indicating the agent is about to do more work.
const PLANNING_PHRASES: &[&str] = &["i will", "i'll", "let me", "next i", "then i"];

/// Phrases indicating the agent is blocked on the user. A blocked task is
/// treated as done-with-output rather than spun forever.
const STOPPING_PHRASES: &[&str] = &[
    "waiting for",
    "need more information",
    "please provide",
    "could you clarify",
    "what would you like",
    "should i proceed",
];

/// Phrases indicating work is planned or underway, used to decide whether a
/// not-yet-complete iteration deserves a continuation round.
const WORK_PHRASES: &[&str] = &[
    "i will",
    "i'll",
    "let me",
    "first,",
    "next,",
    "then,",
    "step 1",
    "step 2",
    "here's my plan",
    "i need to",
    "working on",
    "processing",
    "executing",
    "creating",
    "todo",
    "in_progress",
    "pending",
];

/// Decide whether the output signals genuine completion.
pub fn is_complete(output: &str) -> bool {
    let lower = output.to_lowercase();

    if STRONG_SIGNALS.iter().any(|s| lower.contains(s)) {
        return true;
    }
    if !WEAK_SIGNALS.iter().any(|s| lower.contains(s)) {
        return false;
    }

    // Weak signal present. Discount it if the agent started planning more
    // work after its last mention of "complete".
    if let Some(pos) = lower.rfind("complete") {
        let tail = &lower[pos..];
        if PLANNING_PHRASES.iter().any(|p| tail.contains(p)) {
            return false;
        }
    }

    true
}

/// Decide whether another continuation iteration is warranted.
pub fn needs_continuation(output: &str, had_tool_activity: bool, is_complete: bool) -> bool {
    if is_complete {
        return false;
    }

    let lower = output.to_lowercase();
    if STOPPING_PHRASES.iter().any(|s| lower.contains(s)) {
        return false;
    }

    had_tool_activity || WORK_PHRASES.iter().any(|s| lower.contains(s))
}
