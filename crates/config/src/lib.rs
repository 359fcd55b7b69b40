use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// How much autonomy the executor has before it must pause for a human
/// decision. `exec::ToolExecutor` reads this to decide whether a tool call
/// needs an `ApprovalRequest` round-trip before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Run everything the registry allows, never pause.
    Autonomous,
    /// Pause for destructive or irreversible actions only.
    Balanced,
    /// Pause for anything that writes, deletes, or executes.
    Safer,
}

impl Default for ApprovalMode {
    fn default() -> Self {
        ApprovalMode::Balanced
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub user_name: String,
    pub workspace_path: String,
    pub max_steps: usize,
    pub retry_attempts: u32,
    pub retry_delay_secs: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Meridian".to_string(),
            user_name: String::new(),
            workspace_path: ".".to_string(),
            max_steps: 10,
            retry_attempts: 3,
            retry_delay_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub primary_model: String,
    pub backup_model: String,
    pub base_url: String,
    pub backup_base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            primary_model: "llama3.1:8b".to_string(),
            backup_model: "openai/gpt-4o-mini".to_string(),
            base_url: "http://localhost:11434".to_string(),
            backup_base_url: "https://openrouter.ai/api/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub working_memory_max_tokens: usize,
    pub auto_consolidation_interval_hours: u64,
    pub core_rewrite_requires_approval: bool,
    pub min_retrieval_confidence: f32,
    pub recency_half_life_hours: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_memory_max_tokens: 2000,
            auto_consolidation_interval_hours: 6,
            core_rewrite_requires_approval: true,
            min_retrieval_confidence: 0.3,
            recency_half_life_hours: 7.0 * 24.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub approval_mode: ApprovalMode,
    pub allow_shell: bool,
    pub workspace_root: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            approval_mode: ApprovalMode::Balanced,
            allow_shell: false,
            workspace_root: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OnboardingConfig {
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub heartbeat_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { enabled: true, heartbeat_interval_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub storage_path: String,
    pub archive_after_days: i64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self { storage_path: "./data/tasks.jsonl".to_string(), archive_after_days: 14 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub safety: SafetyConfig,
    pub telemetry: TelemetryConfig,
    pub onboarding: OnboardingConfig,
    pub scheduler: SchedulerConfig,
    pub task: TaskConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("MERIDIAN_BASE_URL") {
            if !value.is_empty() {
                config.llm.base_url = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn needs_onboarding(&self) -> bool {
        !self.onboarding.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load_from(dir.path().join("nope.toml")).unwrap();
        assert!(config.needs_onboarding());
        assert_eq!(config.safety.approval_mode, ApprovalMode::Balanced);
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.onboarding.completed = true;
        config.safety.approval_mode = ApprovalMode::Autonomous;
        config.save_to(&path).unwrap();

        let reloaded = AppConfig::load_from(&path).unwrap();
        assert!(!reloaded.needs_onboarding());
        assert_eq!(reloaded.safety.approval_mode, ApprovalMode::Autonomous);
    }
}
