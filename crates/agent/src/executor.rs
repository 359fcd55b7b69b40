//! Executes an [`ExecutionPlan`] for each of the three modes, streaming
//! progress as [`AgentEvent`]s and running [`reflect_on_result`] after
//! single-step tool calls.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{info, warn};

use meridian_exec::ToolExecutor;
use meridian_llm::PrimaryBackup;
use meridian_tools::{ToolRegistry, ToolResult};

use crate::chat::stream_chat_response;
use crate::events::AgentEvent;
use crate::intent::{FastPathClassifier, intent_to_tool};
use crate::metrics::MetricsCollector;
use crate::reflection::reflect_on_result;
use crate::types::{AgentContext, ExecutionMode, PendingConfirmation, StepStatus};

/// What happened after running a plan to completion (or as far as it could
/// go before needing the user).
pub enum ExecutionOutcome {
    Done,
    NeedInput { prompt: String, step_id: String },
}

async fn run_tool(executor: &ToolExecutor, registry: &ToolRegistry, tool_name: &str, params: HashMap<String, String>) -> ToolResult {
    executor.execute(registry, tool_name, params).await
}

/// Fast path: classify straight to a tool, skipping the planning LLM call
/// entirely. Falls back to single-step execution when no classifier is
/// configured, or the classifier names a tool the registry doesn't have.
pub async fn execute_fast_path(
    context: &AgentContext,
    classifier: Option<&dyn FastPathClassifier>,
    registry: &ToolRegistry,
    tool_executor: &ToolExecutor,
    llm: &PrimaryBackup,
    system_prompt: &str,
    metrics: &mut MetricsCollector,
    events: &mpsc::Sender<AgentEvent>,
) -> ExecutionOutcome {
    metrics.record_mode(ExecutionMode::FastPath);

    let Some(classifier) = classifier else {
        return execute_single_step_inline(context, registry, tool_executor, llm, system_prompt, metrics, events).await;
    };

    let intent = classifier.classify(&context.user_input);
    let mut tool_name = intent_to_tool(&intent.kind).to_string();
    if !registry.has(&tool_name) {
        warn!(tool = %tool_name, "fast path: tool not registered, falling back to chat");
        tool_name = "chat".to_string();
    }

    if tool_name == "chat" {
        let started = Instant::now();
        let mut params = HashMap::new();
        params.insert("message".to_string(), context.user_input.clone());
        let result = run_tool(tool_executor, registry, "chat", params).await;
        metrics.record_tool_call("chat", started.elapsed(), result.success);
        stream_chat_response(llm, system_prompt, &context.user_input, events).await;
        return ExecutionOutcome::Done;
    }

    let started = Instant::now();
    let result = run_tool(tool_executor, registry, &tool_name, HashMap::new()).await;
    metrics.record_tool_call(&tool_name, started.elapsed(), result.success);

    let _ = events.send(AgentEvent::Text(format!("{}\n", result.output))).await;
    ExecutionOutcome::Done
}

/// Runs the single step already planned into `context.plan`, applying one
/// reflection-triggered retry if the chosen tool looks wrong for the input.
pub async fn execute_single_step(
    context: &mut AgentContext,
    registry: &ToolRegistry,
    tool_executor: &ToolExecutor,
    llm: &PrimaryBackup,
    system_prompt: &str,
    metrics: &mut MetricsCollector,
    events: &mpsc::Sender<AgentEvent>,
) -> (ExecutionOutcome, Option<PendingConfirmation>) {
    let Some(plan) = context.plan.as_mut() else {
        let _ = events.send(AgentEvent::Text("nothing to execute\n".to_string())).await;
        return (ExecutionOutcome::Done, None);
    };
    let Some(step) = plan.current_mut() else {
        let _ = events.send(AgentEvent::Text("nothing to execute\n".to_string())).await;
        return (ExecutionOutcome::Done, None);
    };

    step.status = StepStatus::Running;
    let started = Instant::now();
    let mut result = run_tool(tool_executor, registry, &step.tool_name, step.parameters.clone()).await;
    metrics.record_tool_call(&step.tool_name, started.elapsed(), result.success);

    if !result.success {
        step.status = StepStatus::Failed;
        let _ = events.send(AgentEvent::Text(format!("operation failed: {}\n", result.output))).await;
        return (ExecutionOutcome::Done, None);
    }
    step.status = StepStatus::Completed;

    if let Some(retry_tool) = reflect_on_result(&context.user_input, &step.tool_name) {
        info!(from = %step.tool_name, to = retry_tool, "reflection triggered a retry");
        let _ = events.send(AgentEvent::Text(format!("reconsidering, trying {retry_tool} instead...\n"))).await;
        let retry_started = Instant::now();
        let retried = run_tool(tool_executor, registry, retry_tool, HashMap::new()).await;
        metrics.record_tool_call(retry_tool, retry_started.elapsed(), retried.success);
        if retried.success {
            step.tool_name = retry_tool.to_string();
            result = retried;
        }
    }

    step.result = Some(result.clone());

    if result.needs_confirmation() {
        let pending = PendingConfirmation { tool_name: step.tool_name.clone(), params: step.parameters.clone() };
        let _ = events.send(AgentEvent::Text(format!("{}\n", result.output))).await;
        return (ExecutionOutcome::Done, Some(pending));
    }

    if step.tool_name == "chat" {
        stream_chat_response(llm, system_prompt, &context.user_input, events).await;
        return (ExecutionOutcome::Done, None);
    }

    let _ = events.send(AgentEvent::Text(format!("{}\n", result.output))).await;
    (ExecutionOutcome::Done, None)
}

async fn execute_single_step_inline(
    context: &AgentContext,
    registry: &ToolRegistry,
    tool_executor: &ToolExecutor,
    llm: &PrimaryBackup,
    system_prompt: &str,
    metrics: &mut MetricsCollector,
    events: &mpsc::Sender<AgentEvent>,
) -> ExecutionOutcome {
    let mut params = HashMap::new();
    params.insert("message".to_string(), context.user_input.clone());
    let started = Instant::now();
    let result = run_tool(tool_executor, registry, "chat", params).await;
    metrics.record_tool_call("chat", started.elapsed(), result.success);
    stream_chat_response(llm, system_prompt, &context.user_input, events).await;
    ExecutionOutcome::Done
}

/// Runs a multi-step plan sequentially, stopping early (without consuming
/// the rest of the plan) when a step needs confirmation, bounded by
/// `max_steps`.
pub async fn execute_multi_step(
    context: &mut AgentContext,
    registry: &ToolRegistry,
    tool_executor: &ToolExecutor,
    metrics: &mut MetricsCollector,
    max_steps: usize,
    events: &mpsc::Sender<AgentEvent>,
) -> ExecutionOutcome {
    let mut executed = 0;
    loop {
        if executed >= max_steps {
            warn!(max_steps, "multi-step execution hit its step bound");
            break;
        }
        let Some(plan) = context.plan.as_mut() else { break };
        if plan.is_complete() {
            break;
        }
        let step_index = plan.current_step;
        let total = plan.steps.len();
        let Some(step) = plan.current_mut() else { break };
        step.status = StepStatus::Running;
        let tool_name = step.tool_name.clone();
        let params = step.parameters.clone();

        let _ = events.send(AgentEvent::Text(format!("  [{}/{}] {}...\n", step_index + 1, total, tool_name))).await;

        let started = Instant::now();
        let result = run_tool(tool_executor, registry, &tool_name, params).await;
        metrics.record_tool_call(&tool_name, started.elapsed(), result.success);

        let Some(plan) = context.plan.as_mut() else { break };
        let Some(step) = plan.current_mut() else { break };

        if result.needs_confirmation() {
            step.status = StepStatus::NeedsClarification;
            step.result = Some(result.clone());
            let step_id = step.id.clone();
            let _ = events.send(AgentEvent::Text(format!("  {}\n", result.output))).await;
            return ExecutionOutcome::NeedInput { prompt: "confirm? (yes/no)".to_string(), step_id };
        }

        if result.success {
            step.status = StepStatus::Completed;
            if !result.output.is_empty() {
                let _ = events.send(AgentEvent::Text(format!("    {}\n", result.output))).await;
            }
        } else {
            step.status = StepStatus::Failed;
            metrics.record_error(&tool_name, &result.output);
            let _ = events.send(AgentEvent::Text(format!("    error: {}\n", result.output))).await;
        }
        step.result = Some(result);

        plan.advance();
        executed += 1;
    }

    ExecutionOutcome::Done
}

/// Resolves a pending confirmation: `yes` re-runs the held tool call with
/// `confirmed=true` injected; anything else cancels it.
pub async fn execute_confirmation(
    pending: PendingConfirmation,
    user_input: &str,
    registry: &ToolRegistry,
    tool_executor: &ToolExecutor,
    metrics: &mut MetricsCollector,
    events: &mpsc::Sender<AgentEvent>,
) {
    if is_cancel(user_input) {
        let _ = events.send(AgentEvent::Text("cancelled\n".to_string())).await;
        return;
    }

    let mut params = pending.params;
    params.insert("confirmed".to_string(), "true".to_string());
    if pending.tool_name == "delete_tasks" && !params.contains_key("task_ids") && !params.contains_key("delete_all") {
        params.insert("delete_all".to_string(), "true".to_string());
    }

    let started = Instant::now();
    let result = run_tool(tool_executor, registry, &pending.tool_name, params).await;
    metrics.record_tool_call(&pending.tool_name, started.elapsed(), result.success);

    if result.success {
        let _ = events.send(AgentEvent::Text(format!("{}\n", result.output))).await;
    } else {
        let _ = events.send(AgentEvent::Text(format!("operation failed: {}\n", result.output))).await;
    }
}

/// Recognizes a bare confirmation reply (`yes`, `confirm`, ...).
pub fn is_confirmation(user_input: &str) -> bool {
    const KEYWORDS: &[&str] = &["yes", "y", "confirm", "confirmed", "ok", "go ahead", "do it"];
    KEYWORDS.contains(&user_input.trim().to_lowercase().as_str())
}

/// Recognizes a bare cancellation reply (`no`, `cancel`, ...).
pub fn is_cancel(user_input: &str) -> bool {
    const KEYWORDS: &[&str] = &["no", "n", "cancel", "stop", "nevermind", "never mind"];
    KEYWORDS.contains(&user_input.trim().to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_common_confirmation_words() {
        assert!(is_confirmation("yes"));
        assert!(is_confirmation("  Confirm "));
        assert!(!is_confirmation("maybe"));
    }

    #[test]
    fn recognizes_common_cancel_words() {
        assert!(is_cancel("no"));
        assert!(is_cancel("Cancel"));
        assert!(!is_cancel("yes"));
    }
}
