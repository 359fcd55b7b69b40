//! Core agent runtime — assembles every subsystem crate into one handle and
//! exposes the operations the daemon and CLI drive it through.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex as AsyncMutex;

use meridian_agent::Supervisor;
use meridian_config::AppConfig;
use meridian_exec::{ExecutionPolicy, ToolExecutor, default_registry};
use meridian_llm::{OllamaProvider, OpenAiCompatibleProvider, PrimaryBackup};
use meridian_memory::{MemoryManager, WorkingMemory, WorkingMemoryConfig};
use meridian_scheduler::HybridScheduler;
use meridian_task::TaskManager;
use meridian_tools::ToolRegistry;

#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

/// Everything one running instance of the agent needs, built once at daemon
/// startup and shared across every connection and every scheduled job.
pub struct AgentRuntime {
    pub config: Arc<AppConfig>,
    pub supervisor: Arc<Supervisor>,
    pub memory: Arc<AsyncMutex<MemoryManager>>,
    pub task_manager: Arc<std::sync::Mutex<TaskManager>>,
    pub registry: Arc<ToolRegistry>,
    pub tool_executor: Arc<ToolExecutor>,
    pub scheduler: Arc<AsyncMutex<HybridScheduler>>,
}

impl AgentRuntime {
    /// Builds the full runtime: LLM routing, memory, task storage, the tool
    /// registry, and the supervisor that ties them together.
    pub async fn init(config: AppConfig, memory_log_path: impl AsRef<std::path::Path>) -> Result<Self> {
        let config = Arc::new(config);

        let memory = MemoryManager::with_event_log(memory_log_path).await?;
        let memory = Arc::new(AsyncMutex::new(memory));

        let working_memory = WorkingMemory::new(WorkingMemoryConfig {
            max_tokens: config.memory.working_memory_max_tokens,
            ..WorkingMemoryConfig::default()
        });
        let working_memory = Arc::new(AsyncMutex::new(working_memory));

        let task_manager = Arc::new(std::sync::Mutex::new(TaskManager::new(config.task.storage_path.clone())?));

        let workspace_root = std::path::PathBuf::from(&config.safety.workspace_root);
        let agent_data_dir = workspace_root.join(".meridian").join("data");
        std::fs::create_dir_all(&agent_data_dir)?;
        let brave_api_key = std::env::var("BRAVE_API_KEY").ok().filter(|k| !k.trim().is_empty());

        let registry = Arc::new(default_registry(workspace_root.clone(), agent_data_dir, brave_api_key, task_manager.clone()));

        let policy = ExecutionPolicy {
            approval_mode: config.safety.approval_mode,
            allow_shell: config.safety.allow_shell,
            workspace_root,
            ..ExecutionPolicy::default()
        };
        let tool_executor = Arc::new(ToolExecutor::new(policy));

        let llm = Arc::new(build_llm(&config));

        let supervisor = Arc::new(Supervisor::new(
            llm,
            Arc::clone(&registry),
            Arc::clone(&tool_executor),
            Arc::clone(&memory),
            working_memory,
            Arc::clone(&config),
        ));

        Ok(Self {
            config,
            supervisor,
            memory,
            task_manager,
            registry,
            tool_executor,
            scheduler: Arc::new(AsyncMutex::new(HybridScheduler::new())),
        })
    }
}

/// Builds the primary/backup LLM pair from config. The primary provider
/// follows `llm.provider`; the backup is always the OpenAI-compatible
/// client (OpenRouter by default) so a local-only setup still degrades to
/// a hosted model rather than failing outright.
fn build_llm(config: &AppConfig) -> PrimaryBackup {
    let primary: Arc<dyn meridian_llm::LlmProvider> = if config.llm.provider.eq_ignore_ascii_case("openrouter") {
        Arc::new(OpenAiCompatibleProvider::new(config.llm.base_url.clone(), "OPENROUTER_API_KEY"))
    } else {
        Arc::new(OllamaProvider::new(config.llm.base_url.clone()))
    };
    let backup: Arc<dyn meridian_llm::LlmProvider> =
        Arc::new(OpenAiCompatibleProvider::new(config.llm.backup_base_url.clone(), "OPENROUTER_API_KEY"));

    PrimaryBackup::new(primary, config.llm.primary_model.clone(), backup, config.llm.backup_model.clone())
}
