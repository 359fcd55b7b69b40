//! OpenAI-compatible `tools` array built from [`ToolSpec`]s, for the native
//! function-calling path of [`meridian_llm::LlmProvider`].
//!
//! Tool args still cross the registry boundary as string-keyed,
//! string-valued maps, but the declared [`ParamType`] is surfaced in the
//! schema so the model sees real types instead of an all-strings shape.

use meridian_tools::{ParamType, ToolSpec};
use serde_json::{Value, json};

fn json_type(param_type: ParamType) -> &'static str {
    match param_type {
        ParamType::String => "string",
        ParamType::Integer => "integer",
        ParamType::Number => "number",
        ParamType::Boolean => "boolean",
        ParamType::Array => "array",
        ParamType::Object => "object",
    }
}

pub fn specs_to_openai_tools(specs: &[ToolSpec]) -> Value {
    let tools: Vec<Value> = specs
        .iter()
        .map(|spec| {
            let mut properties = serde_json::Map::new();
            let mut required = Vec::new();
            for param in &spec.params {
                let mut schema = json!({ "type": json_type(param.param_type), "description": param.description });
                if !param.r#enum.is_empty() {
                    schema["enum"] = json!(param.r#enum);
                }
                properties.insert(param.name.clone(), schema);
                if param.required {
                    required.push(Value::String(param.name.clone()));
                }
            }
            json!({
                "type": "function",
                "function": {
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": {
                        "type": "object",
                        "properties": Value::Object(properties),
                        "required": required,
                    }
                }
            })
        })
        .collect();
    Value::Array(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_tools::ToolParam;

    #[test]
    fn converts_required_and_optional_params() {
        let specs = vec![ToolSpec {
            name: "create_task".to_string(),
            description: "Create a task".to_string(),
            params: vec![ToolParam { name: "title".to_string(), description: "the title".to_string(), required: true, ..Default::default() }],
            metadata: Default::default(),
        }];
        let tools = specs_to_openai_tools(&specs);
        let arr = tools.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["function"]["name"], "create_task");
        assert_eq!(arr[0]["function"]["parameters"]["required"][0], "title");
    }
}
