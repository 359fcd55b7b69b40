//! The agent's central orchestrator: routes a turn to fast path, single
//! step, or multi step, plans it, executes it, and streams the result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use meridian_config::AppConfig;
use meridian_context::{build_system_prompt, ContextInputs};
use meridian_exec::ToolExecutor;
use meridian_llm::PrimaryBackup;
use meridian_memory::{MemoryManager, WorkingMemory};
use meridian_tools::ToolRegistry;

use crate::events::AgentEvent;
use crate::executor::{execute_confirmation, execute_fast_path, execute_multi_step, execute_single_step, is_cancel, is_confirmation, ExecutionOutcome};
use crate::intent::{analyze_intent, FastPathClassifier};
use crate::metrics::{MetricsCollector, MetricsSummary};
use crate::planner::{plan_multi_step_with_retry, plan_single_step_with_retry};
use crate::types::{AgentContext, ExecutionMode, PendingConfirmation};

const CONTEXT_MEMORY_LIMIT: usize = 5;

/// Everything the supervisor needs, gathered once at startup and shared
/// across turns. Memory and working memory are behind their own mutex
/// since other subsystems (the scheduler, the consolidation pass) mutate
/// them independently of a turn in flight.
pub struct Supervisor {
    llm: Arc<PrimaryBackup>,
    registry: Arc<ToolRegistry>,
    tool_executor: Arc<ToolExecutor>,
    memory: Arc<Mutex<MemoryManager>>,
    working_memory: Arc<Mutex<WorkingMemory>>,
    config: Arc<AppConfig>,
    classifier: Option<Arc<dyn FastPathClassifier>>,
    metrics: Mutex<MetricsCollector>,
    pending_confirmation: Mutex<Option<PendingConfirmation>>,
}

impl Supervisor {
    pub fn new(
        llm: Arc<PrimaryBackup>,
        registry: Arc<ToolRegistry>,
        tool_executor: Arc<ToolExecutor>,
        memory: Arc<Mutex<MemoryManager>>,
        working_memory: Arc<Mutex<WorkingMemory>>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            llm,
            registry,
            tool_executor,
            memory,
            working_memory,
            config,
            classifier: None,
            metrics: Mutex::new(MetricsCollector::new()),
            pending_confirmation: Mutex::new(None),
        }
    }

    pub fn with_fast_path_classifier(mut self, classifier: Arc<dyn FastPathClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub async fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.lock().await.summary()
    }

    pub async fn reset_metrics(&self) {
        self.metrics.lock().await.reset();
    }

    /// Handles one turn of user input, spawning a background task that
    /// streams [`AgentEvent`]s back over the returned channel as they're
    /// produced. The channel closes when the turn is fully handled.
    pub fn handle(self: &Arc<Self>, user_input: String, session_id: String) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(32);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_turn(user_input, session_id, tx).await;
        });
        rx
    }

    async fn run_turn(&self, user_input: String, session_id: String, tx: mpsc::Sender<AgentEvent>) {
        {
            let mut wm = self.working_memory.lock().await;
            wm.add_message("user", &user_input);
        }

        let pending = self.pending_confirmation.lock().await.take();
        if let Some(pending) = pending {
            if is_confirmation(&user_input) || is_cancel(&user_input) {
                let mut metrics = self.metrics.lock().await;
                execute_confirmation(pending, &user_input, &self.registry, &self.tool_executor, &mut metrics, &tx).await;
                return;
            }
            // Not a recognizable confirm/cancel reply — drop the pending
            // state and treat this as a fresh turn instead of blocking on it
            // forever.
            debug!("pending confirmation dropped; treating input as a new turn");
        }

        let mode = analyze_intent(&user_input);
        debug!(?mode, "routed turn");

        let mut context = AgentContext::new(session_id, user_input.clone());

        match mode {
            ExecutionMode::FastPath => {
                let system_prompt = self.build_system_prompt(&user_input).await;
                let mut metrics = self.metrics.lock().await;
                let classifier = self.classifier.as_deref();
                execute_fast_path(&context, classifier, &self.registry, &self.tool_executor, &self.llm, &system_prompt, &mut metrics, &tx).await;
            }
            ExecutionMode::SingleStep => {
                let system_prompt = self.build_system_prompt(&user_input).await;
                let schemas = self.registry.get_schemas();
                let agent_cfg = &self.config.agent;
                {
                    let mut metrics = self.metrics.lock().await;
                    context.plan = Some(
                        plan_single_step_with_retry(
                            &self.llm,
                            &system_prompt,
                            &user_input,
                            &schemas,
                            &mut metrics,
                            agent_cfg.retry_attempts,
                            Duration::from_secs_f32(agent_cfg.retry_delay_secs),
                        )
                        .await,
                    );
                }
                let mut metrics = self.metrics.lock().await;
                let (_, pending) = execute_single_step(&mut context, &self.registry, &self.tool_executor, &self.llm, &system_prompt, &mut metrics, &tx).await;
                if let Some(pending) = pending {
                    *self.pending_confirmation.lock().await = Some(pending);
                }
            }
            ExecutionMode::MultiStep => {
                let system_prompt = self.build_system_prompt(&user_input).await;
                let schemas = self.registry.get_schemas();
                let agent_cfg = &self.config.agent;
                {
                    let mut metrics = self.metrics.lock().await;
                    context.plan = Some(
                        plan_multi_step_with_retry(
                            &self.llm,
                            &system_prompt,
                            &user_input,
                            &schemas,
                            &mut metrics,
                            agent_cfg.retry_attempts,
                            Duration::from_secs_f32(agent_cfg.retry_delay_secs),
                        )
                        .await,
                    );
                }
                if let Some(plan) = &context.plan {
                    let _ = tx.send(AgentEvent::Text(format!("planned {} step(s)\n", plan.steps.len()))).await;
                }
                let mut metrics = self.metrics.lock().await;
                let outcome = execute_multi_step(&mut context, &self.registry, &self.tool_executor, &mut metrics, agent_cfg.max_steps, &tx).await;
                if let ExecutionOutcome::NeedInput { prompt, step_id } = outcome {
                    let _ = tx.send(AgentEvent::NeedInput { prompt, step_id }).await;
                }
            }
        }
    }

    async fn build_system_prompt(&self, user_input: &str) -> String {
        let memory = self.memory.lock().await;
        let working_memory = self.working_memory.lock().await;
        let context_items = memory.context_for_prompt_ranked(user_input, CONTEXT_MEMORY_LIMIT);
        let stats = memory.stats();
        let tool_specs = self.registry.get_schemas();

        let inputs = ContextInputs {
            config: &self.config,
            memory: &memory,
            working_memory: &working_memory,
            user_message: user_input,
            tool_specs: &tool_specs,
            task_manager: None,
            context_items: &context_items,
            stats,
        };
        build_system_prompt(&inputs)
    }
}
