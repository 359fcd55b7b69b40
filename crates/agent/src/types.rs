//! Execution modes, plans, and the per-turn context the supervisor threads
//! through planning and execution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use meridian_tools::ToolResult;

/// Which of the three execution tiers handles a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Greetings, thanks, and other turns a classifier can route to a tool
    /// directly, without a planning LLM call.
    FastPath,
    /// One tool call chosen by the LLM via function calling.
    SingleStep,
    /// A short JSON plan of several tool calls, executed in sequence.
    MultiStep,
}

/// A single step of an [`ExecutionPlan`].
#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    pub tool_name: String,
    pub parameters: HashMap<String, String>,
    pub status: StepStatus,
    pub result: Option<ToolResult>,
}

impl Step {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, parameters: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            parameters,
            status: StepStatus::Pending,
            result: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    NeedsClarification,
    Cancelled,
}

/// The plan the supervisor built for a turn and its progress through it.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub mode: ExecutionMode,
    pub goal: String,
    pub steps: Vec<Step>,
    pub current_step: usize,
}

impl ExecutionPlan {
    pub fn empty(mode: ExecutionMode, goal: impl Into<String>) -> Self {
        Self { mode, goal: goal.into(), steps: Vec::new(), current_step: 0 }
    }

    pub fn single(mode: ExecutionMode, goal: impl Into<String>, step: Step) -> Self {
        Self { mode, goal: goal.into(), steps: vec![step], current_step: 0 }
    }

    pub fn is_complete(&self) -> bool {
        self.current_step >= self.steps.len()
    }

    pub fn current(&self) -> Option<&Step> {
        self.steps.get(self.current_step)
    }

    pub fn current_mut(&mut self) -> Option<&mut Step> {
        self.steps.get_mut(self.current_step)
    }

    pub fn advance(&mut self) {
        self.current_step += 1;
    }
}

/// Per-turn state: what the user asked and the plan built for it. The
/// running transcript of prior turns lives in working memory, not here —
/// this is scoped to a single turn.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub session_id: String,
    pub user_input: String,
    pub plan: Option<ExecutionPlan>,
}

impl AgentContext {
    pub fn new(session_id: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), user_input: user_input.into(), plan: None }
    }
}

/// A tool call awaiting the user's yes/no before it runs for real.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub tool_name: String,
    pub params: HashMap<String, String>,
}
