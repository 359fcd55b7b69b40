pub mod sandbox;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use meridian_config::ApprovalMode;
use meridian_tools::{Tool, ToolRegistry, ToolResult};

// ── Execution Policy ─────────────────────────────────────────────────────────

/// Built from `SafetyConfig` in meridian-config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Coarse approval mode — governs the default approval behaviour.
    pub approval_mode: ApprovalMode,
    pub allow_shell: bool,
    pub workspace_root: PathBuf,
    /// Explicit allow-list of tool names. Empty = all tools are eligible
    /// (subject to the capability gates above).
    pub tool_allowlist: Vec<String>,
    /// Explicit deny-list of tool names. Takes precedence over `tool_allowlist`.
    pub tool_denylist: Vec<String>,
    /// Tools that bypass interactive approval regardless of `approval_mode`.
    pub approval_exempt_tools: Vec<String>,
    /// Apply platform sandbox to shell children when `true` (default).
    /// Requires the `sandbox` Cargo feature to be compiled in, otherwise
    /// this field has no effect.
    pub sandbox_enabled: bool,
    /// Upper bound on how long any single tool invocation may run.
    pub default_timeout_secs: u64,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            approval_mode: ApprovalMode::Balanced,
            allow_shell: false,
            workspace_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            tool_allowlist: vec![],
            tool_denylist: vec![],
            approval_exempt_tools: vec![
                "calendar_add_event".to_string(),
                "remind_me".to_string(),
                "draft_email".to_string(),
                "web_search".to_string(),
                "fetch_page".to_string(),
            ],
            sandbox_enabled: true,
            default_timeout_secs: 30,
        }
    }
}

// ── Approval Flow ────────────────────────────────────────────────────────────

/// A request sent to the user for approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub args: HashMap<String, String>,
    pub risk_summary: String,
}

/// The user's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

/// Channel-based approval gate. The executor sends an `ApprovalRequest`, and
/// the console/front-end side responds with an `ApprovalDecision` via the
/// oneshot.
pub type ApprovalSender = mpsc::Sender<(ApprovalRequest, oneshot::Sender<ApprovalDecision>)>;
pub type ApprovalReceiver = mpsc::Receiver<(ApprovalRequest, oneshot::Sender<ApprovalDecision>)>;

/// Create a new approval channel pair.
pub fn approval_channel() -> (ApprovalSender, ApprovalReceiver) {
    mpsc::channel(16)
}

// ── Tool Executor ────────────────────────────────────────────────────────────

/// Orchestrates tool invocation with safety checks and approval flow, sitting
/// one layer above [`ToolRegistry::execute`]. Like the registry, this never
/// returns a Rust `Err` for a tool-level failure — only a bad `ExecutionPolicy`
/// programming error (e.g. `check_capability` misuse) would. Policy denials,
/// approval denials, unknown tools, and runtime failures all surface as a
/// failed [`ToolResult`].
pub struct ToolExecutor {
    policy: ExecutionPolicy,
    approval_tx: Option<ApprovalSender>,
}

impl ToolExecutor {
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self {
            policy,
            approval_tx: None,
        }
    }

    /// Attach an approval channel for interactive approval flow.
    pub fn with_approval(mut self, tx: ApprovalSender) -> Self {
        self.approval_tx = Some(tx);
        self
    }

    /// Execute a tool by name from the registry, applying safety policy.
    pub async fn execute(
        &self,
        registry: &ToolRegistry,
        tool_name: &str,
        args: HashMap<String, String>,
    ) -> ToolResult {
        if !registry.has(tool_name) {
            return ToolResult::failed(format!("unknown tool: {tool_name}"));
        }

        if let Err(err) = self.check_capability(tool_name) {
            return ToolResult::failed(err.to_string());
        }

        if self.requires_approval(tool_name) {
            match self.request_approval(tool_name, &args).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(tool = tool_name, "tool execution denied by user");
                    return ToolResult::failed(format!("execution of '{tool_name}' denied by user"));
                }
                Err(err) => return ToolResult::failed(err.to_string()),
            }
        }

        info!(tool = tool_name, "executing tool");
        let timeout = Duration::from_secs(self.policy.default_timeout_secs);

        // For run_shell with the `sandbox` feature active, spawn the child
        // with a pre-exec sandbox hook instead of delegating to the tool impl.
        #[cfg(all(feature = "sandbox", unix))]
        if tool_name == "run_shell" && self.policy.sandbox_enabled {
            return match self.run_shell_sandboxed(&args).await {
                Ok(output) => ToolResult { success: output.success, output: output.output, error: None, data: serde_json::json!({}) },
                Err(err) => ToolResult::failed(err.to_string()),
            };
        }

        registry.execute(tool_name, timeout, args).await
    }

    /// Returns `true` when this tool invocation needs interactive approval
    /// based on the configured `ApprovalMode`.
    ///
    /// | Mode         | Needs approval                                  |
    /// |--------------|--------------------------------------------------|
    /// | `Autonomous` | Never                                             |
    /// | `Balanced`   | Write / shell tools and anything not read-only    |
    /// | `Safer`      | Every tool (unless explicitly exempt)             |
    fn requires_approval(&self, tool_name: &str) -> bool {
        if self
            .policy
            .approval_exempt_tools
            .contains(&tool_name.to_string())
        {
            return false;
        }
        match &self.policy.approval_mode {
            ApprovalMode::Autonomous => false,
            ApprovalMode::Balanced => {
                const READ_ONLY: &[&str] = &["read_file", "web_search", "fetch_page"];
                !READ_ONLY.contains(&tool_name)
            }
            ApprovalMode::Safer => true,
        }
    }

    fn check_capability(&self, tool_name: &str) -> Result<()> {
        if tool_name == "run_shell" && !self.policy.allow_shell {
            bail!("shell execution is disabled by safety policy (set allow_shell = true)");
        }
        if self.policy.tool_denylist.contains(&tool_name.to_string()) {
            bail!("tool '{}' is blocked by policy (tool_denylist)", tool_name);
        }
        if !self.policy.tool_allowlist.is_empty()
            && !self.policy.tool_allowlist.contains(&tool_name.to_string())
        {
            bail!("tool '{}' is not in the tool_allowlist", tool_name);
        }
        Ok(())
    }

    /// Run `run_shell` with a sandbox pre-exec hook on supported platforms.
    /// Mirrors `RunShellTool::run()` but inserts `sandbox::apply_to_child`
    /// into the child process before the shell binary executes.
    #[cfg(all(feature = "sandbox", unix))]
    async fn run_shell_sandboxed(
        &self,
        args: &HashMap<String, String>,
    ) -> Result<meridian_tools::ToolOutput> {
        use std::os::unix::process::CommandExt as _;

        let command = args
            .get("command")
            .ok_or_else(|| anyhow::anyhow!("missing required param: command"))?
            .clone();
        let timeout_secs: u64 = args
            .get("timeout_secs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let workspace_root = self.policy.workspace_root.clone();
        let workspace_str = workspace_root.display().to_string();

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&command).current_dir(&workspace_root);

        // SAFETY: `apply_to_child` is designed to be called between fork and
        // exec and only makes async-signal-safe syscalls (prctl, seccomp,
        // sandbox_init).
        unsafe {
            let ws = workspace_str.clone();
            cmd.as_std_mut().pre_exec(move || sandbox::apply_to_child(&ws));
        }

        let output_result = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("command timed out after {}s", timeout_secs))??;

        let stdout = String::from_utf8_lossy(&output_result.stdout);
        let stderr = String::from_utf8_lossy(&output_result.stderr);
        let combined = if stderr.is_empty() {
            stdout.to_string()
        } else {
            format!("{stdout}\n[stderr] {stderr}")
        };
        let max_output = 32768;
        let result = if combined.len() > max_output {
            let mut end = max_output;
            while end > 0 && !combined.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}…[truncated]", &combined[..end])
        } else {
            combined
        };

        Ok(meridian_tools::ToolOutput {
            success: output_result.status.success(),
            output: result,
        })
    }

    async fn request_approval(
        &self,
        tool_name: &str,
        args: &HashMap<String, String>,
    ) -> Result<bool> {
        if self.policy.approval_exempt_tools.contains(&tool_name.to_string()) {
            info!(tool = tool_name, "tool is approval-exempt; auto-approving");
            return Ok(true);
        }

        let Some(tx) = &self.approval_tx else {
            warn!(
                tool = tool_name,
                "approval required but no approval channel configured; denying"
            );
            return Ok(false);
        };

        let risk = match tool_name {
            "run_shell" => format!(
                "Execute shell command: {}",
                args.get("command").unwrap_or(&"(unknown)".to_string())
            ),
            "write_file" => format!(
                "Write to file: {}",
                args.get("path").unwrap_or(&"(unknown)".to_string())
            ),
            "read_file" => format!(
                "Read file: {}",
                args.get("path").unwrap_or(&"(unknown)".to_string())
            ),
            _ => format!("Execute tool: {tool_name}"),
        };

        let request = ApprovalRequest {
            tool_name: tool_name.to_string(),
            args: args.clone(),
            risk_summary: risk,
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send((request, reply_tx))
            .await
            .map_err(|_| anyhow::anyhow!("approval channel closed"))?;

        let decision = reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("approval response channel dropped"))?;

        Ok(decision == ApprovalDecision::Approve)
    }
}

// ── Workspace boundary helper ────────────────────────────────────────────────

pub fn ensure_within_workspace(workspace_root: &Path, target: &Path) -> Result<PathBuf> {
    let canonical_root = workspace_root.canonicalize()?;
    let joined = if target.is_absolute() {
        target.to_path_buf()
    } else {
        canonical_root.join(target)
    };
    let canonical_target = joined.canonicalize()?;

    if !canonical_target.starts_with(&canonical_root) {
        bail!(
            "path escapes workspace boundary: {}",
            canonical_target.display()
        );
    }

    Ok(canonical_target)
}

// ── Convenience: create a default registry with built-in tools ───────────────

pub fn default_registry(
    workspace_root: PathBuf,
    agent_data_dir: PathBuf,
    brave_api_key: Option<String>,
    task_manager: std::sync::Arc<std::sync::Mutex<meridian_task::TaskManager>>,
) -> ToolRegistry {
    use meridian_tools::builtins::{
        CalendarAddEventTool, ChatTool, CompleteTaskTool, CreateTaskTool, DeleteTasksTool,
        DraftEmailTool, FetchPageTool, FinanceQuoteTool, ListTasksTool, ReadFileTool,
        RemindMeTool, RunShellTool, WebBrowseTool, WebSearchTool, WriteFileTool,
    };
    use std::sync::Arc;

    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(ReadFileTool { workspace_root: workspace_root.clone() }) as Arc<dyn Tool>);
    registry.register(Arc::new(WriteFileTool { workspace_root: workspace_root.clone() }));
    registry.register(Arc::new(RunShellTool { workspace_root: workspace_root.clone() }));
    registry.register(Arc::new(CalendarAddEventTool { data_dir: agent_data_dir.clone() }));
    registry.register(Arc::new(WebSearchTool { brave_api_key: brave_api_key.clone() }));
    registry.register(Arc::new(FetchPageTool));
    registry.register(Arc::new(WebBrowseTool));
    registry.register(Arc::new(FinanceQuoteTool));
    registry.register(Arc::new(DraftEmailTool { data_dir: agent_data_dir.clone() }));
    registry.register(Arc::new(ChatTool));
    registry.register(Arc::new(CreateTaskTool { manager: task_manager.clone() }));
    registry.register(Arc::new(ListTasksTool { manager: task_manager.clone() }));
    registry.register(Arc::new(CompleteTaskTool { manager: task_manager.clone() }));
    registry.register(Arc::new(DeleteTasksTool { manager: task_manager }));
    registry.register(Arc::new(RemindMeTool { data_dir: agent_data_dir }));

    info!(tools = registry.len(), "default tool registry assembled");
    registry
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use crate::{ExecutionPolicy, ToolExecutor, default_registry, ensure_within_workspace};

    fn test_task_manager(label: &str) -> Arc<Mutex<meridian_task::TaskManager>> {
        let path = std::env::temp_dir().join(format!("meridian-exec-tasks-{label}.jsonl"));
        let _ = fs::remove_file(&path);
        Arc::new(Mutex::new(meridian_task::TaskManager::new(path).expect("task manager")))
    }

    #[test]
    fn workspace_guard_rejects_escape() -> anyhow::Result<()> {
        let base = std::env::temp_dir().join("meridian-exec-workspace-test");
        let child = base.join("safe");
        fs::create_dir_all(&child)?;

        let escaped = ensure_within_workspace(&base, &PathBuf::from("../"));
        assert!(escaped.is_err());
        Ok(())
    }

    #[test]
    fn workspace_guard_accepts_child_path() -> anyhow::Result<()> {
        let base = std::env::temp_dir().join("meridian-exec-ws-accept-test");
        let child = base.join("subdir");
        fs::create_dir_all(&child)?;
        let result = ensure_within_workspace(&base, &PathBuf::from("subdir"));
        assert!(result.is_ok());
        Ok(())
    }

    // ── requires_approval tests ────────────────────────────────────────────

    #[test]
    fn autonomous_never_requires_approval() {
        let policy = ExecutionPolicy {
            approval_mode: meridian_config::ApprovalMode::Autonomous,
            ..ExecutionPolicy::default()
        };
        let executor = ToolExecutor::new(policy);
        assert!(!executor.requires_approval("run_shell"));
        assert!(!executor.requires_approval("write_file"));
        assert!(!executor.requires_approval("read_file"));
    }

    #[test]
    fn safer_always_requires_approval() {
        let policy = ExecutionPolicy {
            approval_mode: meridian_config::ApprovalMode::Safer,
            approval_exempt_tools: vec![],
            ..ExecutionPolicy::default()
        };
        let executor = ToolExecutor::new(policy);
        assert!(executor.requires_approval("read_file"));
        assert!(executor.requires_approval("write_file"));
        assert!(executor.requires_approval("run_shell"));
    }

    #[test]
    fn balanced_read_only_no_approval() {
        let policy = ExecutionPolicy {
            approval_mode: meridian_config::ApprovalMode::Balanced,
            approval_exempt_tools: vec![],
            ..ExecutionPolicy::default()
        };
        let executor = ToolExecutor::new(policy);
        assert!(!executor.requires_approval("read_file"));
        assert!(!executor.requires_approval("web_search"));
    }

    #[test]
    fn balanced_write_tools_need_approval() {
        let policy = ExecutionPolicy {
            approval_mode: meridian_config::ApprovalMode::Balanced,
            approval_exempt_tools: vec![],
            ..ExecutionPolicy::default()
        };
        let executor = ToolExecutor::new(policy);
        assert!(executor.requires_approval("write_file"));
        assert!(executor.requires_approval("run_shell"));
        assert!(executor.requires_approval("remind_me"));
        assert!(executor.requires_approval("calendar_add_event"));
    }

    #[test]
    fn exempt_tools_bypass_approval() {
        let policy = ExecutionPolicy {
            approval_mode: meridian_config::ApprovalMode::Safer,
            approval_exempt_tools: vec!["run_shell".to_string()],
            ..ExecutionPolicy::default()
        };
        let executor = ToolExecutor::new(policy);
        assert!(!executor.requires_approval("run_shell"));
    }

    // ── check_capability tests ─────────────────────────────────────────────

    #[test]
    fn denylist_blocks_tool() {
        let policy = ExecutionPolicy {
            tool_denylist: vec!["write_file".to_string()],
            ..ExecutionPolicy::default()
        };
        let executor = ToolExecutor::new(policy);
        assert!(executor.check_capability("write_file").is_err());
    }

    #[test]
    fn allowlist_blocks_unlisted_tool() {
        let policy = ExecutionPolicy {
            tool_allowlist: vec!["read_file".to_string()],
            ..ExecutionPolicy::default()
        };
        let executor = ToolExecutor::new(policy);
        assert!(executor.check_capability("read_file").is_ok());
        assert!(executor.check_capability("write_file").is_err());
    }

    #[test]
    fn empty_allowlist_permits_all() {
        let policy = ExecutionPolicy {
            tool_allowlist: vec![],
            tool_denylist: vec![],
            ..ExecutionPolicy::default()
        };
        let executor = ToolExecutor::new(policy);
        assert!(executor.check_capability("read_file").is_ok());
        assert!(executor.check_capability("write_file").is_ok());
        assert!(executor.check_capability("run_shell").is_err()); // shell blocked by allow_shell=false
    }

    #[test]
    fn denylist_overrides_allowlist() {
        let policy = ExecutionPolicy {
            tool_allowlist: vec!["write_file".to_string()],
            tool_denylist: vec!["write_file".to_string()],
            ..ExecutionPolicy::default()
        };
        let executor = ToolExecutor::new(policy);
        assert!(executor.check_capability("write_file").is_err());
    }

    // ── Integration tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn shell_blocked_when_capability_disabled() -> anyhow::Result<()> {
        let workspace = std::env::temp_dir().join("meridian-exec-shell-test");
        fs::create_dir_all(&workspace)?;

        let policy = ExecutionPolicy {
            allow_shell: false,
            ..ExecutionPolicy::default()
        };

        let executor = ToolExecutor::new(policy);
        let registry =
            default_registry(
                workspace,
                std::env::temp_dir().join("meridian-exec-shell-data"),
                None,
                test_task_manager("shell"),
            );

        let mut args = HashMap::new();
        args.insert("command".to_string(), "echo hi".to_string());

        let result = executor.execute(&registry, "run_shell", args).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("disabled"));
        Ok(())
    }

    #[tokio::test]
    async fn read_file_within_workspace() -> anyhow::Result<()> {
        let workspace = std::env::temp_dir().join("meridian-exec-read-test");
        fs::create_dir_all(&workspace)?;
        fs::write(workspace.join("hello.txt"), "Hello, world!")?;

        let policy = ExecutionPolicy {
            allow_shell: true,
            approval_mode: meridian_config::ApprovalMode::Autonomous,
            workspace_root: workspace.clone(),
            ..ExecutionPolicy::default()
        };

        let executor = ToolExecutor::new(policy);
        let registry =
            default_registry(
                workspace,
                std::env::temp_dir().join("meridian-exec-read-data"),
                None,
                test_task_manager("read"),
            );

        let mut args = HashMap::new();
        args.insert("path".to_string(), "hello.txt".to_string());

        let result = executor.execute(&registry, "read_file", args).await;
        assert!(result.success);
        assert_eq!(result.output, "Hello, world!");
        Ok(())
    }

    #[tokio::test]
    async fn unknown_tool_returns_failed_result_not_error() -> anyhow::Result<()> {
        let workspace = std::env::temp_dir().join("meridian-exec-unknown-test");
        fs::create_dir_all(&workspace)?;

        let policy = ExecutionPolicy {
            approval_mode: meridian_config::ApprovalMode::Autonomous,
            ..ExecutionPolicy::default()
        };

        let executor = ToolExecutor::new(policy);
        let registry =
            default_registry(
                workspace,
                std::env::temp_dir().join("meridian-exec-unknown-data"),
                None,
                test_task_manager("unknown"),
            );

        let result = executor
            .execute(&registry, "nonexistent_tool", HashMap::new())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown tool"));
        Ok(())
    }

    // ── Default policy tests ───────────────────────────────────────────────

    #[test]
    fn default_policy_shell_disabled() {
        let p = ExecutionPolicy::default();
        assert!(!p.allow_shell);
    }

    #[test]
    fn default_policy_balanced_mode() {
        let p = ExecutionPolicy::default();
        assert!(matches!(p.approval_mode, meridian_config::ApprovalMode::Balanced));
    }

    #[test]
    fn default_policy_has_exempt_tools() {
        let p = ExecutionPolicy::default();
        assert!(!p.approval_exempt_tools.is_empty());
    }
}
