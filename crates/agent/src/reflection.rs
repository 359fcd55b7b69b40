//! Narrow post-execution check: did the chosen tool actually match what the
//! user asked for?
//!
//! Deliberately not an LLM-judged critique — a second model call to grade
//! the first would double latency and cost for a failure mode ("list when
//! the user said delete") that a keyword check already catches. If richer
//! reflection is ever needed it belongs in a new pass, not a rewrite of this
//! one: this stays a single specific retry rule, not a general critic.

const DELETE_KEYWORDS: &[&str] = &["delete", "remove", "clear", "clean up", "get rid of"];
const VIEW_KEYWORDS: &[&str] = &["show", "view", "list", "what do i have", "see my"];

/// Returns the tool name the supervisor should retry with instead of
/// `tool_name`, or `None` if the result already matches user intent.
pub fn reflect_on_result(user_input: &str, tool_name: &str) -> Option<&'static str> {
    let lower = user_input.to_lowercase();

    if tool_name == "list_tasks" && DELETE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return Some("delete_tasks");
    }

    if tool_name == "delete_tasks"
        && VIEW_KEYWORDS.iter().any(|kw| lower.contains(kw))
        && !DELETE_KEYWORDS.iter().any(|kw| lower.contains(kw))
    {
        return Some("list_tasks");
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_list_when_user_asked_to_delete() {
        assert_eq!(reflect_on_result("please delete my old tasks", "list_tasks"), Some("delete_tasks"));
    }

    #[test]
    fn flags_delete_when_user_asked_to_view() {
        assert_eq!(reflect_on_result("show me my tasks", "delete_tasks"), Some("list_tasks"));
    }

    #[test]
    fn delete_keyword_wins_over_view_keyword() {
        assert_eq!(reflect_on_result("clean up and show me what's left", "delete_tasks"), None);
    }

    #[test]
    fn matching_tool_needs_no_retry() {
        assert_eq!(reflect_on_result("what tasks do I have", "list_tasks"), None);
        assert_eq!(reflect_on_result("delete all my tasks", "delete_tasks"), None);
    }
}
