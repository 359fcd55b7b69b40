//! Plan construction for the single-step and multi-step execution modes.
//!
//! Both planners retry on LLM/parse failure with linear backoff, then fall
//! back to a plan that just routes the turn to the `chat` tool rather than
//! surfacing an error to the user.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tracing::{error, warn};

use meridian_llm::{ChatMessage, PrimaryBackup, extract_json_output};
use meridian_tools::ToolSpec;

use crate::json_params::json_object_to_string_map;
use crate::metrics::MetricsCollector;
use crate::tools_json::specs_to_openai_tools;
use crate::types::{ExecutionMode, ExecutionPlan, Step};

fn chat_fallback_plan(mode: ExecutionMode, user_input: &str) -> ExecutionPlan {
    let mut params = HashMap::new();
    params.insert("message".to_string(), user_input.to_string());
    ExecutionPlan::single(mode, user_input, Step::new("step_0", "chat", params))
}

/// Plans a single tool call via native/prompt-engineered function calling,
/// retrying `retry_attempts` times with `retry_delay * attempt` backoff
/// before falling back to `chat`.
pub async fn plan_single_step_with_retry(
    llm: &PrimaryBackup,
    system_prompt: &str,
    user_input: &str,
    schemas: &[ToolSpec],
    metrics: &mut MetricsCollector,
    retry_attempts: u32,
    retry_delay: Duration,
) -> ExecutionPlan {
    let tools_json = specs_to_openai_tools(schemas);
    let messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(user_input)];

    for attempt in 0..retry_attempts.max(1) {
        let started = Instant::now();
        let response = llm.chat(&messages, Some(&tools_json)).await;
        metrics.record_llm_call(started.elapsed());

        match response {
            Ok(resp) if resp.finish_reason != "error" => {
                metrics.record_mode(ExecutionMode::SingleStep);
                if let Some(call) = resp.tool_calls.into_iter().next() {
                    let params = json_object_to_string_map(&call.function.arguments);
                    return ExecutionPlan::single(
                        ExecutionMode::SingleStep,
                        user_input,
                        Step::new("step_0", call.function.name, params),
                    );
                }
                return chat_fallback_plan(ExecutionMode::SingleStep, user_input);
            }
            Ok(resp) => {
                warn!(attempt, reason = %resp.content, "single-step plan attempt returned an error response");
            }
            Err(err) => {
                warn!(attempt, error = %err, "single-step plan attempt failed");
            }
        }

        if attempt + 1 < retry_attempts {
            tokio::time::sleep(retry_delay * (attempt + 1)).await;
        }
    }

    error!("single-step planning exhausted all retries, falling back to chat");
    chat_fallback_plan(ExecutionMode::SingleStep, user_input)
}

#[derive(Debug, Deserialize)]
struct PlannedStepJson {
    tool: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct PlanJson {
    #[serde(default)]
    goal: Option<String>,
    #[serde(default)]
    steps: Vec<PlannedStepJson>,
}

/// Plans a short sequence of tool calls by asking the LLM for a JSON object
/// at low temperature, retrying like [`plan_single_step_with_retry`] before
/// falling back to single-step planning entirely (never straight to `chat`
/// — a failed multi-step plan might still resolve in one tool call).
pub async fn plan_multi_step_with_retry(
    llm: &PrimaryBackup,
    system_prompt: &str,
    user_input: &str,
    schemas: &[ToolSpec],
    metrics: &mut MetricsCollector,
    retry_attempts: u32,
    retry_delay: Duration,
) -> ExecutionPlan {
    let prompt = build_multi_step_prompt(user_input, schemas);
    let messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(prompt)];

    for attempt in 0..retry_attempts.max(1) {
        let started = Instant::now();
        let response = llm.chat(&messages, None).await;
        metrics.record_llm_call(started.elapsed());

        match response {
            Ok(resp) if resp.finish_reason != "error" && !resp.content.trim().is_empty() => {
                if let Some(plan_json) = extract_json_output::<PlanJson>(&resp.content) {
                    metrics.record_mode(ExecutionMode::MultiStep);
                    let goal = plan_json.goal.unwrap_or_else(|| user_input.to_string());
                    let steps = plan_json
                        .steps
                        .into_iter()
                        .enumerate()
                        .map(|(i, s)| Step::new(format!("step_{i}"), s.tool, json_object_to_string_map(&s.params)))
                        .collect::<Vec<_>>();
                    if steps.is_empty() {
                        warn!(attempt, "multi-step plan parsed but contained no steps");
                    } else {
                        return ExecutionPlan { mode: ExecutionMode::MultiStep, goal, steps, current_step: 0 };
                    }
                } else {
                    warn!(attempt, response = %resp.content, "multi-step plan response was not valid JSON");
                }
            }
            Ok(resp) => {
                warn!(attempt, reason = %resp.content, "multi-step plan attempt returned an error or empty response");
            }
            Err(err) => {
                warn!(attempt, error = %err, "multi-step plan attempt failed");
            }
        }

        if attempt + 1 < retry_attempts {
            tokio::time::sleep(retry_delay * (attempt + 1)).await;
        }
    }

    error!("multi-step planning exhausted all retries, falling back to single-step");
    plan_single_step_with_retry(llm, system_prompt, user_input, schemas, metrics, retry_attempts, retry_delay).await
}

fn build_multi_step_prompt(user_input: &str, schemas: &[ToolSpec]) -> String {
    let tool_list = schemas
        .iter()
        .map(|s| format!("- {}: {}", s.name, s.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Analyze the user's request and produce a short plan of tool calls.\n\n\
         User request:\n{user_input}\n\n\
         Available tools:\n{tool_list}\n\n\
         Respond with ONLY a JSON object of the form:\n\
         {{\"goal\": \"<restated goal>\", \"steps\": [{{\"tool\": \"<tool name>\", \"params\": {{...}}}}]}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_fallback_plan_targets_chat_tool_with_message() {
        let plan = chat_fallback_plan(ExecutionMode::SingleStep, "hello there");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool_name, "chat");
        assert_eq!(plan.steps[0].parameters["message"], "hello there");
    }

    #[test]
    fn multi_step_prompt_lists_every_tool() {
        let schemas = vec![ToolSpec {
            name: "list_tasks".to_string(),
            description: "List tasks".to_string(),
            params: vec![],
            metadata: Default::default(),
        }];
        let prompt = build_multi_step_prompt("what's on my plate", &schemas);
        assert!(prompt.contains("list_tasks"));
        assert!(prompt.contains("what's on my plate"));
    }
}
