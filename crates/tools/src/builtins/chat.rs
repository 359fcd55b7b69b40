//! Marker tool for turns that are plain conversation rather than a task.
//!
//! `ChatTool` doesn't generate a reply itself — its `ToolOutput.output` is a
//! placeholder. Callers that see `tool_name == "chat"` are expected to
//! generate the actual reply via the LLM directly (streamed), the same way
//! the registry-level dispatch can't know how to talk to a model.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::{SecurityLevel, Tool, ToolMetadata, ToolOutput, ToolParam, ToolSpec};

pub struct ChatTool;

#[async_trait]
impl Tool for ChatTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "chat".to_string(),
            description: "Casual conversation, greetings, or small talk with no task to perform.".to_string(),
            params: vec![ToolParam {
                name: "message".to_string(),
                description: "The user's message".to_string(),
                required: true,
                ..Default::default()
            }],
            metadata: ToolMetadata { security_level: SecurityLevel::Low, read_only: true, group: "chat".to_string(), ..Default::default() },
        }
    }

    async fn run(&self, _args: &HashMap<String, String>) -> Result<ToolOutput> {
        Ok(ToolOutput { success: true, output: String::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_is_correct() {
        let spec = ChatTool.spec();
        assert_eq!(spec.name, "chat");
        assert_eq!(spec.params.len(), 1);
        assert!(spec.params[0].required);
        assert!(spec.metadata.read_only);
    }

    #[tokio::test]
    async fn run_is_a_no_op_marker() {
        let mut args = HashMap::new();
        args.insert("message".to_string(), "hey there".to_string());
        let result = ChatTool.run(&args).await.unwrap();
        assert!(result.success);
        assert!(result.output.is_empty());
    }
}
