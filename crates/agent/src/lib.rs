//! Turn orchestration: routes each user turn through a fast, single-step, or
//! multi-step execution tier, plans it with the LLM where needed, runs it
//! against the tool registry, and streams progress back as [`AgentEvent`]s.

pub mod chat;
pub mod events;
pub mod executor;
pub mod intent;
pub mod json_params;
pub mod metrics;
pub mod planner;
pub mod reflection;
pub mod supervisor;
pub mod tools_json;
pub mod types;

pub use events::AgentEvent;
pub use executor::ExecutionOutcome;
pub use intent::{FastPathClassifier, Intent};
pub use metrics::{MetricsCollector, MetricsSummary};
pub use supervisor::Supervisor;
pub use types::{AgentContext, ExecutionMode, ExecutionPlan, PendingConfirmation, Step, StepStatus};
