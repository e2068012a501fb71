//! Prompt construction for the first and continuation iterations.

/// Literal marker the agent is asked to emit when everything is done.
pub const COMPLETION_MARKER: &str = "[TASK_COMPLETE]";

/// Wrap the user's request for the first iteration of a session.
///
/// The instructions establish the completion contract the detector relies
/// on: keep a todo list, never stop to ask permission, and emit the literal
/// marker plus a summary once every objective is met.
pub fn initial_prompt(user_prompt: &str, agent_names: &[String]) -> String {
    let mut prompt = format!(
        "You are working autonomously on the following task:\n\n\
         {user_prompt}\n\n\
         Guidelines:\n\
         - Break the task into a todo list and keep it updated as you work.\n\
         - Do not ask for permission or confirmation; make reasonable decisions and proceed.\n\
         - When ALL objectives are met, write the literal marker {COMPLETION_MARKER} \
         followed by a short summary of what was done.\n"
    );

    if !agent_names.is_empty() {
        prompt.push_str(&format!(
            "\nSpecialist agents available for delegation: {}.\n",
            agent_names.join(", ")
        ));
    }

    prompt
}

/// Fixed prompt for iterations after the first.
pub fn continuation_prompt() -> &'static str {
    "Continue working on the task. Resume any pending todos without asking for \
     permission. When every todo is completed, write the literal marker \
     [TASK_COMPLETE] followed by a short summary."
}
