//! Heuristic pre-LLM routing: decide an [`ExecutionMode`] from keywords
//! alone, and (for fast path) classify a message straight to a tool name
//! without any LLM call.

use crate::types::ExecutionMode;

/// Phrases short enough, and generic enough, to answer without planning.
const SIMPLE_GREETING_PATTERNS: &[&str] =
    &["hello", "hi there", "hey", "thanks", "thank you", "goodbye", "bye"];

/// A short message containing one of these never needs a plan.
const SIMPLE_MAX_LEN: usize = 20;

/// Phrases that imply more than one tool call or an explicit sequence.
const MULTI_STEP_INDICATORS: &[&str] =
    &["then", "first ... then", "after that", "summarize all", "gather and", "analyze and"];

/// Decide which execution tier should handle `user_input`, without calling
/// the LLM. Mirrors the original three-tier router: short greetings go fast
/// path, anything that reads as a multi-part request goes multi step, and
/// everything else is single step (the LLM still picks the tool, just in
/// one function-calling round instead of a JSON plan).
pub fn analyze_intent(user_input: &str) -> ExecutionMode {
    let lower = user_input.to_lowercase();
    let trimmed = lower.trim();

    if user_input.chars().count() < SIMPLE_MAX_LEN
        && SIMPLE_GREETING_PATTERNS.iter().any(|p| trimmed.contains(p))
    {
        return ExecutionMode::FastPath;
    }

    if MULTI_STEP_INDICATORS.iter().any(|i| trimmed.contains(i)) {
        return ExecutionMode::MultiStep;
    }

    ExecutionMode::SingleStep
}

/// A coarse intent label produced by a pluggable fast-path classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub kind: String,
}

/// Implemented by whatever front-end-specific semantic router is wired in
/// (a small embedding model, a rule table, etc). The supervisor falls back
/// to single step whenever no classifier is configured, or the classifier
/// names a tool the registry doesn't have.
pub trait FastPathClassifier: Send + Sync {
    fn classify(&self, user_input: &str) -> Intent;
}

/// Maps a fast-path intent kind to the tool that should handle it. Intents
/// with no entry here fall back to `"chat"`.
pub fn intent_to_tool(intent_kind: &str) -> &'static str {
    match intent_kind {
        "create_task" => "create_task",
        "query_task" => "list_tasks",
        "update_task" => "complete_task",
        "delete_task" => "delete_tasks",
        "set_reminder" => "create_task",
        _ => "chat",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_greeting_routes_to_fast_path() {
        assert_eq!(analyze_intent("hi there"), ExecutionMode::FastPath);
        assert_eq!(analyze_intent("thanks!"), ExecutionMode::FastPath);
    }

    #[test]
    fn long_greeting_does_not_shortcut() {
        let long = "hi there, I wanted to ask you something longer than twenty characters";
        assert_ne!(analyze_intent(long), ExecutionMode::FastPath);
    }

    #[test]
    fn sequential_request_routes_to_multi_step() {
        assert_eq!(
            analyze_intent("read the report then summarize it for me"),
            ExecutionMode::MultiStep
        );
    }

    #[test]
    fn default_is_single_step() {
        assert_eq!(analyze_intent("what tasks do I have"), ExecutionMode::SingleStep);
    }

    #[test]
    fn intent_to_tool_maps_known_kinds() {
        assert_eq!(intent_to_tool("create_task"), "create_task");
        assert_eq!(intent_to_tool("query_task"), "list_tasks");
    }

    #[test]
    fn unknown_intent_falls_back_to_chat() {
        assert_eq!(intent_to_tool("something_unrecognized"), "chat");
    }
}
