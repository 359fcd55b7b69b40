use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ── Tool trait and registry ──────────────────────────────────────────────────

/// JSON-schema type a parameter is validated against. Wire-level tool args
/// arrive as plain strings; this is what the string is checked/coerced
/// against, not a Rust-side type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

const MAX_STRING_LENGTH: usize = 10_000;
const MAX_ARRAY_LENGTH: usize = 100;
const MAX_INTEGER_VALUE: i64 = 1_000_000_000;

/// Describes a single parameter that a tool accepts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
    #[serde(default)]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub r#enum: Vec<String>,
    /// String/array length cap; falls back to [`MAX_STRING_LENGTH`] /
    /// [`MAX_ARRAY_LENGTH`] when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

/// How cautious the caller should be before running a tool without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub security_level: SecurityLevel,
    pub read_only: bool,
    pub group: String,
}

/// Static metadata about a tool, used by the LLM to decide which tool to call
/// and by the registry to decide how to gate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
    #[serde(default)]
    pub metadata: ToolMetadata,
}

/// What a tool implementation itself returns. The registry wraps this into
/// the richer [`ToolResult`] that callers actually see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

/// What `ToolRegistry::execute` returns — always, even when the tool wasn't
/// found, failed validation, panicked, or timed out. Callers never have to
/// match on a registry-internal `Result` error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { success: true, output: output.into(), error: None, data: json!({}) }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self { success: false, output: error.clone(), error: Some(error), data: json!({}) }
    }

    pub fn needs_confirmation(&self) -> bool {
        self.data.get("needs_confirmation").and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Trait implemented by every tool (built-in or WASM-loaded).
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn run(&self, args: &HashMap<String, String>) -> anyhow::Result<ToolOutput>;

    /// Whether this specific invocation should pause for human approval
    /// before running. Defaults to the tool's static security level; tools
    /// with call-dependent risk (e.g. deleting a specific path) can
    /// override this to inspect `args`.
    fn needs_confirmation(&self, _args: &HashMap<String, String>) -> bool {
        self.spec().metadata.security_level == SecurityLevel::High
    }
}

/// Central registry for all available tools: name -> lookup, parameter
/// validation before execution, and timeout-bounded safe execution that
/// never propagates a Rust error for "not found", "bad params", "panicked",
/// or "timed out" — all four become a failed [`ToolResult`].
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, overwriting (and warning about) any existing tool
    /// with the same name, matching the original registry's semantics.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name;
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "overwriting already-registered tool");
        }
        self.tools.insert(name, tool);
    }

    pub fn register_multiple(&mut self, tools: Vec<Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn get_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.get_names().into_iter().filter_map(|name| self.tools.get(&name).map(|t| t.spec())).collect()
    }

    pub fn get_schemas(&self) -> Vec<ToolSpec> {
        self.list_tools()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Six-step validation pipeline, in order: required-presence, type
    /// check, enum membership, length bounds, numeric range, absolute
    /// integer cap. First failure short-circuits.
    fn validate(spec: &ToolSpec, params: &HashMap<String, String>) -> Option<String> {
        for param in &spec.params {
            let Some(value) = params.get(&param.name) else {
                if param.required {
                    return Some(format!("missing required parameter: {}", param.name));
                }
                continue;
            };

            if let Some(err) = Self::validate_type(param, value) {
                return Some(err);
            }

            if !param.r#enum.is_empty() && !param.r#enum.iter().any(|v| v == value) {
                return Some(format!(
                    "parameter {} has invalid value '{value}', expected one of: {:?}",
                    param.name, param.r#enum
                ));
            }

            if param.param_type == ParamType::String {
                let max_len = param.max_length.unwrap_or(MAX_STRING_LENGTH);
                if value.chars().count() > max_len {
                    return Some(format!("parameter {} exceeds maximum length {max_len}", param.name));
                }
            }

            if param.param_type == ParamType::Array {
                let max_len = param.max_length.unwrap_or(MAX_ARRAY_LENGTH);
                let len = if value.is_empty() { 0 } else { value.split(',').count() };
                if len > max_len {
                    return Some(format!("parameter {} exceeds maximum array length {max_len}", param.name));
                }
            }

            if matches!(param.param_type, ParamType::Integer | ParamType::Number) {
                let Ok(n) = value.parse::<f64>() else {
                    return Some(format!("parameter {} must be numeric", param.name));
                };
                if let Some(min) = param.min_value {
                    if n < min {
                        return Some(format!("parameter {} must not be less than {min}", param.name));
                    }
                }
                if let Some(max) = param.max_value {
                    if n > max {
                        return Some(format!("parameter {} must not be greater than {max}", param.name));
                    }
                }
                if param.param_type == ParamType::Integer && n.abs() > MAX_INTEGER_VALUE as f64 {
                    return Some(format!("parameter {} is out of the allowed range", param.name));
                }
            }
        }
        None
    }

    fn validate_type(param: &ToolParam, value: &str) -> Option<String> {
        match param.param_type {
            ParamType::String | ParamType::Object | ParamType::Array => None,
            ParamType::Boolean => {
                (value != "true" && value != "false").then(|| format!("parameter {} must be a boolean", param.name))
            }
            ParamType::Integer => {
                if value == "true" || value == "false" {
                    return Some(format!("parameter {} must be an integer, not a boolean", param.name));
                }
                value.parse::<i64>().is_err().then(|| format!("parameter {} must be an integer", param.name))
            }
            ParamType::Number => {
                value.parse::<f64>().is_err().then(|| format!("parameter {} must be a number", param.name))
            }
        }
    }

    /// Looks up, validates, and runs a tool, bounding its execution to
    /// `timeout` and catching any panic inside `run`. Never returns a Rust
    /// `Err` — every failure mode becomes a failed [`ToolResult`].
    pub async fn execute(&self, name: &str, timeout: Duration, params: HashMap<String, String>) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::failed(format!("tool not found: {name}"));
        };

        let spec = tool.spec();
        if let Some(err) = Self::validate(&spec, &params) {
            return ToolResult::failed(err);
        }

        let flagged = tool.needs_confirmation(&params);
        let run_fut = AssertUnwindSafe(tool.run(&params)).catch_unwind();

        let outcome = match tokio::time::timeout(timeout, run_fut).await {
            Ok(Ok(Ok(output))) => {
                let mut result = ToolResult { success: output.success, output: output.output, error: None, data: json!({}) };
                if flagged {
                    result.data = json!({ "needs_confirmation": true });
                }
                result
            }
            Ok(Ok(Err(err))) => ToolResult::failed(err.to_string()),
            Ok(Err(panic)) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(tool = name, panic = %msg, "tool panicked");
                ToolResult::failed(format!("tool '{name}' panicked: {msg}"))
            }
            Err(_elapsed) => {
                tracing::warn!(tool = name, ?timeout, "tool execution timed out");
                ToolResult::failed(format!("tool '{name}' timed out after {timeout:?}"))
            }
        };

        tracing::debug!(tool = name, success = outcome.success, "tool executed");
        outcome
    }
}

// ── Built-in tools ───────────────────────────────────────────────────────────

pub mod builtins;
pub use builtins::{
    CalendarAddEventTool, DraftEmailTool, FetchPageTool, FinanceQuoteTool, ReadFileTool,
    RemindMeTool, RunShellTool, WebBrowseTool, WebSearchTool, WriteFileTool,
};

// ── ToolRegistry tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod registry_tests {
    use super::*;

    struct DummyTool {
        name: String,
        security_level: SecurityLevel,
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.clone(),
                description: format!("dummy tool: {}", self.name),
                params: vec![ToolParam { name: "input".to_string(), description: "test param".to_string(), required: true, ..Default::default() }],
                metadata: ToolMetadata { security_level: self.security_level, ..Default::default() },
            }
        }
        async fn run(&self, args: &HashMap<String, String>) -> anyhow::Result<ToolOutput> {
            if args.get("input").is_some_and(|v| v == "panic") {
                panic!("boom");
            }
            if args.get("input").is_some_and(|v| v == "slow") {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Ok(ToolOutput { success: true, output: format!("ran {}", self.name) })
        }
    }

    fn dummy(name: &str) -> Arc<dyn Tool> {
        Arc::new(DummyTool { name: name.to_string(), security_level: SecurityLevel::Low })
    }

    #[test]
    fn empty_registry() {
        let reg = ToolRegistry::new();
        assert!(reg.list_tools().is_empty());
        assert!(reg.get("anything").is_none());
    }

    #[test]
    fn register_overwrites_with_same_name() {
        let mut reg = ToolRegistry::new();
        reg.register(dummy("dup"));
        reg.register(dummy("dup"));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn execute_missing_tool_returns_failed_result_not_error() {
        let reg = ToolRegistry::new();
        let result = reg.execute("nope", Duration::from_secs(1), HashMap::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn execute_missing_required_param_fails_validation() {
        let mut reg = ToolRegistry::new();
        reg.register(dummy("needs_input"));
        let result = reg.execute("needs_input", Duration::from_secs(1), HashMap::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing required parameter"));
    }

    #[tokio::test]
    async fn execute_runs_successfully() {
        let mut reg = ToolRegistry::new();
        reg.register(dummy("runner"));
        let mut params = HashMap::new();
        params.insert("input".to_string(), "x".to_string());
        let result = reg.execute("runner", Duration::from_secs(1), params).await;
        assert!(result.success);
        assert_eq!(result.output, "ran runner");
    }

    #[tokio::test]
    async fn execute_catches_panics_as_failed_result() {
        let mut reg = ToolRegistry::new();
        reg.register(dummy("panicker"));
        let mut params = HashMap::new();
        params.insert("input".to_string(), "panic".to_string());
        let result = reg.execute("panicker", Duration::from_secs(1), params).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn execute_enforces_timeout() {
        let mut reg = ToolRegistry::new();
        reg.register(dummy("slowpoke"));
        let mut params = HashMap::new();
        params.insert("input".to_string(), "slow".to_string());
        let result = reg.execute("slowpoke", Duration::from_millis(10), params).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn high_security_tool_is_flagged_for_confirmation() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(DummyTool { name: "risky".to_string(), security_level: SecurityLevel::High }));
        let mut params = HashMap::new();
        params.insert("input".to_string(), "x".to_string());
        let result = reg.execute("risky", Duration::from_secs(1), params).await;
        assert!(result.success);
        assert!(result.needs_confirmation());
    }
}
