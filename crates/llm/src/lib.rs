use std::collections::HashMap;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

// ── Chat message types for structured tool calling ───────────────────────────

/// Role in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content: None, tool_calls, tool_call_id: None }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: ChatRole::Tool, content: Some(content.into()), tool_calls: vec![], tool_call_id: Some(tool_call_id.into()) }
    }
}

/// A tool call requested by the LLM, native or reconstructed from a
/// prompt-engineered reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_tool_call_type")]
    pub r#type: String,
    pub function: ToolCallFunction,
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Response from a structured chat call.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub provider: String,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
}

/// Whether a provider accepts a `tools` parameter on its chat endpoint, or
/// needs tool schemas folded into the system prompt and its replies parsed
/// for a bare `{"tool": "...", "params": {...}}` object instead.
///
/// A provider starts out with whatever capability it's constructed with and
/// can be demoted from `Native` to `PromptEngineered` at runtime if the
/// backend rejects the `tools` field — see [`LlmProvider::demote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallCapability {
    Native,
    PromptEngineered,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn capability(&self) -> ToolCallCapability;

    /// Permanently demotes this provider to prompt-engineered tool calling.
    /// Called after the backend signals it doesn't accept the native
    /// `tools` field, so later calls in the same process don't pay for
    /// another failed native attempt.
    fn demote(&self);

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
    ) -> Result<ChatResponse>;

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        tx: mpsc::Sender<String>,
    ) -> Result<ChatResponse>;
}

// ── Prompt-engineered tool calling ───────────────────────────────────────────

/// Folds tool schemas into an instruction block appended to the system
/// prompt for providers without native `tools` support. Asks the model to
/// reply with a single fenced JSON object when it wants to call a tool.
pub fn encode_tools_as_prompt(tools: &serde_json::Value) -> String {
    let mut out = String::from(
        "You can call tools by replying with ONLY a fenced json block of the form:\n\
         ```json\n{\"tool\": \"<name>\", \"params\": {...}}\n```\n\
         Available tools:\n",
    );
    if let Some(list) = tools.as_array() {
        for tool in list {
            let func = tool.get("function").unwrap_or(tool);
            let name = func.get("name").and_then(|v| v.as_str()).unwrap_or("unknown");
            let desc = func.get("description").and_then(|v| v.as_str()).unwrap_or("");
            out.push_str(&format!("- {name}: {desc}\n"));
        }
    }
    out
}

/// Parses a prompt-engineered tool call out of free text, looking for a
/// fenced or bare `{"tool": "...", "params": {...}}` object.
pub fn parse_prompt_engineered_tool_call(text: &str) -> Option<ToolCall> {
    let value: serde_json::Value = extract_json_output(text)?;
    let name = value.get("tool")?.as_str()?.to_string();
    let arguments = value.get("params").cloned().unwrap_or(json!({}));
    Some(ToolCall {
        id: "call_0".to_string(),
        r#type: "function".to_string(),
        function: ToolCallFunction { name, arguments },
    })
}

// ── Ollama provider ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    native: AtomicBool,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), native: AtomicBool::new(true) }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn capability(&self) -> ToolCallCapability {
        if self.native.load(Ordering::Relaxed) {
            ToolCallCapability::Native
        } else {
            ToolCallCapability::PromptEngineered
        }
    }

    fn demote(&self) {
        if self.native.swap(false, Ordering::Relaxed) {
            tracing::warn!(provider = "ollama", "demoted to prompt-engineered tool calling");
        }
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
    ) -> Result<ChatResponse> {
        let endpoint = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let (messages, effective_tools) = self.prepare(messages, tools);

        let ollama_messages = messages_to_ollama(&messages);
        let mut payload = json!({ "model": model, "messages": ollama_messages, "stream": false });
        if let Some(tools_val) = &effective_tools {
            payload["tools"] = tools_val.clone();
        }

        let response = self.client.post(&endpoint).json(&payload).send().await;
        match response {
            Ok(response) => {
                let status = response.status();
                let body: serde_json::Value = response.json().await?;
                if !status.is_success() {
                    if status.as_u16() == 400 && effective_tools.is_some() {
                        self.demote();
                    }
                    return Ok(ChatResponse {
                        provider: self.name().to_string(),
                        content: format!("ollama error ({status}): {body}"),
                        tool_calls: vec![],
                        finish_reason: "error".to_string(),
                    });
                }
                let (content, mut tool_calls, mut finish_reason) = parse_ollama_chat_response(&body)?;
                if tool_calls.is_empty() && self.capability() == ToolCallCapability::PromptEngineered {
                    if let Some(call) = parse_prompt_engineered_tool_call(&content) {
                        finish_reason = "tool_calls".to_string();
                        tool_calls = vec![call];
                    }
                }
                Ok(ChatResponse { provider: self.name().to_string(), content, tool_calls, finish_reason })
            }
            Err(error) => Ok(ChatResponse {
                provider: self.name().to_string(),
                content: format!("ollama unavailable at {}: {error}", self.base_url),
                tool_calls: vec![],
                finish_reason: "error".to_string(),
            }),
        }
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        tx: mpsc::Sender<String>,
    ) -> Result<ChatResponse> {
        let endpoint = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let (messages, effective_tools) = self.prepare(messages, tools);

        let ollama_messages = messages_to_ollama(&messages);
        let mut payload = json!({ "model": model, "messages": ollama_messages, "stream": true });
        if let Some(tools_val) = &effective_tools {
            payload["tools"] = tools_val.clone();
        }

        let mut response = self.client.post(&endpoint).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await?;
            return Ok(ChatResponse {
                provider: self.name().to_string(),
                content: format!("ollama error ({status}): {body}"),
                tool_calls: vec![],
                finish_reason: "error".to_string(),
            });
        }

        let mut full_response = String::new();
        let mut tool_calls: Vec<ToolCall> = vec![];
        let mut finish_reason = "stop".to_string();

        while let Some(chunk) = response.chunk().await? {
            let chunk_str = String::from_utf8_lossy(&chunk);
            for line in chunk_str.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(json) = serde_json::from_str::<serde_json::Value>(line) else { continue };
                if let Some(content) = json.get("message").and_then(|m| m.get("content")).and_then(|v| v.as_str()) {
                    if !content.is_empty() {
                        full_response.push_str(content);
                        let _ = tx.send(content.to_string()).await;
                    }
                }
                if json.get("done").and_then(|v| v.as_bool()).unwrap_or(false) {
                    if let Some(calls) = json.get("message").and_then(|m| m.get("tool_calls")).and_then(|v| v.as_array()) {
                        tool_calls = parse_ollama_tool_calls(calls);
                        if !tool_calls.is_empty() {
                            finish_reason = "tool_calls".to_string();
                        }
                    }
                }
            }
        }

        if tool_calls.is_empty() && self.capability() == ToolCallCapability::PromptEngineered {
            if let Some(call) = parse_prompt_engineered_tool_call(&full_response) {
                finish_reason = "tool_calls".to_string();
                tool_calls = vec![call];
            }
        }

        Ok(ChatResponse { provider: self.name().to_string(), content: full_response, tool_calls, finish_reason })
    }
}

impl OllamaProvider {
    /// Folds tool schemas into the system prompt when running in
    /// prompt-engineered mode, and suppresses the native `tools` field.
    fn prepare(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
    ) -> (Vec<ChatMessage>, Option<serde_json::Value>) {
        match (self.capability(), tools) {
            (ToolCallCapability::Native, _) => (messages.to_vec(), tools.cloned()),
            (ToolCallCapability::PromptEngineered, Some(tools)) => {
                let instructions = encode_tools_as_prompt(tools);
                let mut out = Vec::with_capacity(messages.len() + 1);
                out.push(ChatMessage::system(instructions));
                out.extend_from_slice(messages);
                (out, None)
            }
            (ToolCallCapability::PromptEngineered, None) => (messages.to_vec(), None),
        }
    }
}

fn messages_to_ollama(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => "tool",
            };
            let mut msg = json!({ "role": role });
            if let Some(ref content) = m.content {
                msg["content"] = json!(content);
            }
            if !m.tool_calls.is_empty() {
                let calls: Vec<serde_json::Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| json!({ "function": { "name": tc.function.name, "arguments": tc.function.arguments } }))
                    .collect();
                msg["tool_calls"] = json!(calls);
            }
            if let Some(ref id) = m.tool_call_id {
                msg["tool_call_id"] = json!(id);
            }
            msg
        })
        .collect()
}

fn parse_ollama_chat_response(body: &serde_json::Value) -> Result<(String, Vec<ToolCall>, String)> {
    let content = body.get("message").and_then(|m| m.get("content")).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let tool_calls = body
        .get("message")
        .and_then(|m| m.get("tool_calls"))
        .and_then(|v| v.as_array())
        .map(|calls| parse_ollama_tool_calls(calls))
        .unwrap_or_default();
    let finish_reason = if !tool_calls.is_empty() { "tool_calls".to_string() } else { "stop".to_string() };
    Ok((content, tool_calls, finish_reason))
}

fn parse_ollama_tool_calls(calls: &[serde_json::Value]) -> Vec<ToolCall> {
    calls
        .iter()
        .enumerate()
        .filter_map(|(i, call)| {
            let func = call.get("function")?;
            let name = func.get("name")?.as_str()?.to_string();
            let arguments = func.get("arguments").cloned().unwrap_or(json!({}));
            Some(ToolCall { id: format!("call_{i}"), r#type: "function".to_string(), function: ToolCallFunction { name, arguments } })
        })
        .collect()
}

// ── OpenAI-compatible provider (OpenRouter and friends) ──────────────────────

#[derive(Debug)]
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key_env: String,
    native: AtomicBool,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
            native: AtomicBool::new(true),
        }
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.trim().is_empty())
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    fn capability(&self) -> ToolCallCapability {
        if self.native.load(Ordering::Relaxed) {
            ToolCallCapability::Native
        } else {
            ToolCallCapability::PromptEngineered
        }
    }

    fn demote(&self) {
        if self.native.swap(false, Ordering::Relaxed) {
            tracing::warn!(provider = %self.name(), "demoted to prompt-engineered tool calling");
        }
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
    ) -> Result<ChatResponse> {
        let Some(api_key) = self.api_key() else {
            return Ok(ChatResponse {
                provider: self.name().to_string(),
                content: format!("missing API key: set {}", self.api_key_env),
                tool_calls: vec![],
                finish_reason: "error".to_string(),
            });
        };

        let use_native = self.capability() == ToolCallCapability::Native;
        let (messages, effective_tools) = if use_native {
            (messages.to_vec(), tools.cloned())
        } else if let Some(tools) = tools {
            let mut out = vec![ChatMessage::system(encode_tools_as_prompt(tools))];
            out.extend_from_slice(messages);
            (out, None)
        } else {
            (messages.to_vec(), None)
        };

        let mut payload = json!({ "model": model, "messages": messages_to_openai(&messages) });
        if let Some(tools_val) = &effective_tools {
            payload["tools"] = tools_val.clone();
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            // OpenAI-compatible backends reject an unsupported `tools` field
            // with a 400; fall back to prompt-engineered calling from here on.
            if status.as_u16() == 400 && effective_tools.is_some() {
                self.demote();
            }
            return Ok(ChatResponse {
                provider: self.name().to_string(),
                content: format!("{} error ({status}): {body}", self.name()),
                tool_calls: vec![],
                finish_reason: "error".to_string(),
            });
        }

        let (content, mut tool_calls, mut finish_reason) = parse_openai_chat_response(&body)?;
        if tool_calls.is_empty() && !use_native {
            if let Some(call) = parse_prompt_engineered_tool_call(&content) {
                finish_reason = "tool_calls".to_string();
                tool_calls = vec![call];
            }
        }
        Ok(ChatResponse { provider: self.name().to_string(), content, tool_calls, finish_reason })
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        tx: mpsc::Sender<String>,
    ) -> Result<ChatResponse> {
        let Some(api_key) = self.api_key() else {
            return Ok(ChatResponse {
                provider: self.name().to_string(),
                content: format!("missing API key: set {}", self.api_key_env),
                tool_calls: vec![],
                finish_reason: "error".to_string(),
            });
        };

        let use_native = self.capability() == ToolCallCapability::Native;
        let mut payload = json!({ "model": model, "messages": messages_to_openai(messages), "stream": true });
        if use_native {
            if let Some(tools_val) = tools {
                payload["tools"] = tools_val.clone();
            }
        }

        let mut response = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await?;
            return Ok(ChatResponse {
                provider: self.name().to_string(),
                content: format!("{} error ({status}): {body}", self.name()),
                tool_calls: vec![],
                finish_reason: "error".to_string(),
            });
        }

        let mut full_response = String::new();
        let mut tool_call_map: HashMap<usize, (String, String, String)> = HashMap::new();
        let mut finish_reason = "stop".to_string();

        while let Some(chunk) = response.chunk().await? {
            let chunk_str = String::from_utf8_lossy(&chunk);
            for line in chunk_str.lines() {
                let line = line.trim();
                if line.is_empty() || line == "data: [DONE]" {
                    continue;
                }
                let Some(data) = line.strip_prefix("data: ") else { continue };
                let Ok(json) = serde_json::from_str::<serde_json::Value>(data) else { continue };
                let Some(choice) = json.get("choices").and_then(|c| c.get(0)) else { continue };

                if let Some(fr) = choice.get("finish_reason").and_then(|v| v.as_str()) {
                    finish_reason = fr.to_string();
                }

                let Some(delta) = choice.get("delta") else { continue };
                if let Some(content) = delta.get("content").and_then(|v| v.as_str()) {
                    if !content.is_empty() {
                        full_response.push_str(content);
                        let _ = tx.send(content.to_string()).await;
                    }
                }

                if let Some(tcs) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                    for tc in tcs {
                        let idx = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                        let entry = tool_call_map.entry(idx).or_insert_with(|| (String::new(), String::new(), String::new()));
                        if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                            entry.0 = id.to_string();
                        }
                        if let Some(func) = tc.get("function") {
                            if let Some(name) = func.get("name").and_then(|v| v.as_str()) {
                                entry.1 = name.to_string();
                            }
                            if let Some(args) = func.get("arguments").and_then(|v| v.as_str()) {
                                entry.2.push_str(args);
                            }
                        }
                    }
                }
            }
        }

        let mut tool_calls: Vec<ToolCall> = Vec::new();
        if !tool_call_map.is_empty() {
            let mut indices: Vec<usize> = tool_call_map.keys().copied().collect();
            indices.sort();
            for idx in indices {
                let (id, name, args_str) = &tool_call_map[&idx];
                let arguments = serde_json::from_str(args_str).unwrap_or(json!({}));
                tool_calls.push(ToolCall {
                    id: if id.is_empty() { format!("call_{idx}") } else { id.clone() },
                    r#type: "function".to_string(),
                    function: ToolCallFunction { name: name.clone(), arguments },
                });
            }
            if finish_reason == "stop" {
                finish_reason = "tool_calls".to_string();
            }
        } else if !use_native {
            if let Some(call) = parse_prompt_engineered_tool_call(&full_response) {
                finish_reason = "tool_calls".to_string();
                tool_calls = vec![call];
            }
        }

        Ok(ChatResponse { provider: self.name().to_string(), content: full_response, tool_calls, finish_reason })
    }
}

fn messages_to_openai(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => "tool",
            };
            let mut msg = json!({ "role": role, "content": m.content.clone().map(|c| json!(c)).unwrap_or(json!(null)) });
            if !m.tool_calls.is_empty() {
                let calls: Vec<serde_json::Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.function.name,
                                "arguments": if tc.function.arguments.is_string() {
                                    tc.function.arguments.clone()
                                } else {
                                    json!(tc.function.arguments.to_string())
                                }
                            }
                        })
                    })
                    .collect();
                msg["tool_calls"] = json!(calls);
            }
            if let Some(ref id) = m.tool_call_id {
                msg["tool_call_id"] = json!(id);
            }
            msg
        })
        .collect()
}

fn parse_openai_chat_response(body: &serde_json::Value) -> Result<(String, Vec<ToolCall>, String)> {
    let choice = body.get("choices").and_then(|c| c.get(0));
    let message = choice.and_then(|c| c.get("message"));

    let content = message.and_then(|m| m.get("content")).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let finish_reason = choice.and_then(|c| c.get("finish_reason")).and_then(|v| v.as_str()).unwrap_or("stop").to_string();

    let tool_calls = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, tc)| {
                    let id = tc.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let arguments = func
                        .get("arguments")
                        .map(|v| if let Some(s) = v.as_str() { serde_json::from_str(s).unwrap_or(json!({})) } else { v.clone() })
                        .unwrap_or(json!({}));
                    Some(ToolCall { id: if id.is_empty() { format!("call_{i}") } else { id }, r#type: "function".to_string(), function: ToolCallFunction { name, arguments } })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Ok((content, tool_calls, finish_reason))
}

// ── Primary/backup fallback wrapper ───────────────────────────────────────────

/// Tries the primary provider first, falling back to the backup on error.
/// Every fallback is logged so a silently-degraded provider doesn't go
/// unnoticed.
pub struct PrimaryBackup {
    pub primary: Arc<dyn LlmProvider>,
    pub primary_model: String,
    pub backup: Arc<dyn LlmProvider>,
    pub backup_model: String,
}

impl PrimaryBackup {
    pub fn new(primary: Arc<dyn LlmProvider>, primary_model: impl Into<String>, backup: Arc<dyn LlmProvider>, backup_model: impl Into<String>) -> Self {
        Self { primary, primary_model: primary_model.into(), backup, backup_model: backup_model.into() }
    }

    pub async fn chat(&self, messages: &[ChatMessage], tools: Option<&serde_json::Value>) -> Result<ChatResponse> {
        match self.primary.chat(&self.primary_model, messages, tools).await {
            Ok(resp) if resp.finish_reason != "error" => Ok(resp),
            Ok(resp) => {
                tracing::warn!(primary = %self.primary.name(), reason = %resp.content, "primary returned an error response, falling back");
                self.backup.chat(&self.backup_model, messages, tools).await
            }
            Err(err) => {
                tracing::warn!(primary = %self.primary.name(), error = %err, "primary call failed, falling back");
                self.backup.chat(&self.backup_model, messages, tools).await
            }
        }
    }

    pub async fn chat_stream(&self, messages: &[ChatMessage], tools: Option<&serde_json::Value>, tx: mpsc::Sender<String>) -> Result<ChatResponse> {
        match self.primary.chat_stream(&self.primary_model, messages, tools, tx.clone()).await {
            Ok(resp) if resp.finish_reason != "error" => Ok(resp),
            Ok(resp) => {
                tracing::warn!(primary = %self.primary.name(), reason = %resp.content, "primary stream returned an error response, falling back");
                self.backup.chat_stream(&self.backup_model, messages, tools, tx).await
            }
            Err(err) => {
                tracing::warn!(primary = %self.primary.name(), error = %err, "primary stream failed, falling back");
                self.backup.chat_stream(&self.backup_model, messages, tools, tx).await
            }
        }
    }
}

// ── Model discovery ───────────────────────────────────────────────────────────

const OPENROUTER_FALLBACK_MODELS: &[&str] = &[
    "openai/gpt-4o-mini",
    "openai/gpt-4.1-mini",
    "anthropic/claude-3.5-sonnet",
    "anthropic/claude-3.7-sonnet",
    "google/gemini-2.0-flash-001",
    "meta-llama/llama-3.1-8b-instruct",
    "meta-llama/llama-3.1-70b-instruct",
    "mistralai/mistral-small-3.1-24b-instruct",
    "qwen/qwen-2.5-72b-instruct",
    "deepseek/deepseek-chat",
];

pub async fn list_ollama_models() -> Result<Vec<String>> {
    let output = Command::new("ollama").arg("list").output();
    let output = match output {
        Ok(output) => output,
        Err(_) => {
            return Ok(vec!["ollama not found in PATH".to_string(), "install ollama and run: ollama pull <model>".to_string()]);
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            return Ok(vec!["failed to read ollama models".to_string()]);
        }
        return Ok(vec![format!("failed to read ollama models: {stderr}")]);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut models = stdout.lines().skip(1).filter_map(|line| line.split_whitespace().next()).map(ToString::to_string).collect::<Vec<_>>();
    models.sort();
    models.dedup();
    if models.is_empty() {
        models.push("no models installed (run: ollama pull <model>)".to_string());
    }
    Ok(models)
}

pub async fn list_openrouter_models() -> Result<Vec<String>> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(6)).build()?;
    let response = client.get("https://openrouter.ai/api/v1/models").send().await;

    let models = match response {
        Ok(response) if response.status().is_success() => {
            let body: serde_json::Value = response.json().await?;
            let mut items = body
                .get("data")
                .and_then(|data| data.as_array())
                .map(|items| items.iter().filter_map(|item| item.get("id").and_then(|id| id.as_str())).map(ToString::to_string).collect::<Vec<_>>())
                .unwrap_or_default();
            items.sort();
            items.dedup();
            if items.is_empty() {
                OPENROUTER_FALLBACK_MODELS.iter().map(|model| (*model).to_string()).collect::<Vec<_>>()
            } else {
                items
            }
        }
        _ => OPENROUTER_FALLBACK_MODELS.iter().map(|model| (*model).to_string()).collect::<Vec<_>>(),
    };

    Ok(models)
}

// ── Structured output extraction ──────────────────────────────────────────────

/// Structured fields an LLM may embed in a fenced `json` code block in its
/// reply, separate from the native tool-call machinery above — used for
/// free-form structured actions like recording a memory.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StructuredOutput {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub reply: Option<String>,
}

/// Extracts the first valid JSON value from an LLM response: a fenced
/// ` ```json ` block if present, otherwise the span from the first `{` to
/// the last `}`.
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    if let Some(fence_start) = response.find("```json") {
        let after_fence = &response[fence_start + "```json".len()..];
        if let Some(json_start) = after_fence.find(|c: char| !c.is_whitespace()) {
            let json_body = &after_fence[json_start..];
            if let Some(fence_end) = json_body.find("```") {
                let json_str = json_body[..fence_end].trim();
                if let Ok(val) = serde_json::from_str(json_str) {
                    return Some(val);
                }
            }
        }
    }

    let trimmed = response.trim();
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                let candidate = &trimmed[start..=end];
                if let Ok(val) = serde_json::from_str(candidate) {
                    return Some(val);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_output_default_all_none() {
        let out = StructuredOutput::default();
        assert!(out.action.is_none());
        assert!(out.rationale.is_none());
        assert!(out.reply.is_none());
        assert_eq!(out.params, serde_json::Value::Null);
    }

    #[test]
    fn extract_fenced_json() {
        let raw = "Sure!\n```json\n{\"action\":\"record_belief\",\"reply\":\"Got it\"}\n```";
        let out = extract_json_output::<StructuredOutput>(raw).unwrap();
        assert_eq!(out.action.as_deref(), Some("record_belief"));
        assert_eq!(out.reply.as_deref(), Some("Got it"));
    }

    #[test]
    fn extract_bare_json() {
        let raw = r#"{"action":"hello","reply":"world"}"#;
        let out = extract_json_output::<StructuredOutput>(raw).unwrap();
        assert_eq!(out.action.as_deref(), Some("hello"));
    }

    #[test]
    fn extract_returns_none_for_plain_text() {
        let raw = "Hello, this is a plain text response with no JSON.";
        assert!(extract_json_output::<StructuredOutput>(raw).is_none());
    }

    #[test]
    fn extract_returns_none_for_malformed_json_in_fence() {
        let raw = "```json\n{not valid json}\n```";
        assert!(extract_json_output::<StructuredOutput>(raw).is_none());
    }

    #[test]
    fn parses_prompt_engineered_tool_call() {
        let raw = "```json\n{\"tool\": \"read_file\", \"params\": {\"path\": \"a.txt\"}}\n```";
        let call = parse_prompt_engineered_tool_call(raw).unwrap();
        assert_eq!(call.function.name, "read_file");
        assert_eq!(call.function.arguments["path"], "a.txt");
    }

    #[test]
    fn ollama_provider_starts_native_and_demotes_once() {
        let provider = OllamaProvider::new("http://localhost:11434");
        assert_eq!(provider.capability(), ToolCallCapability::Native);
        provider.demote();
        assert_eq!(provider.capability(), ToolCallCapability::PromptEngineered);
        // idempotent: demoting an already-demoted provider doesn't panic or flip state.
        provider.demote();
        assert_eq!(provider.capability(), ToolCallCapability::PromptEngineered);
    }

    #[test]
    fn encode_tools_as_prompt_lists_each_tool_name() {
        let tools = json!([
            { "function": { "name": "read_file", "description": "reads a file" } },
            { "function": { "name": "write_file", "description": "writes a file" } },
        ]);
        let encoded = encode_tools_as_prompt(&tools);
        assert!(encoded.contains("read_file"));
        assert!(encoded.contains("write_file"));
    }
}
