//! Conversion between the loosely-typed JSON a planning LLM produces and the
//! `HashMap<String, String>` the tool registry actually executes with.

use std::collections::HashMap;

use serde_json::Value;

/// Flattens a JSON object's values to strings. Non-string scalars are
/// stringified; `null` becomes an empty string; nested arrays/objects are
/// serialized back to their compact JSON form rather than dropped.
pub fn json_object_to_string_map(value: &Value) -> HashMap<String, String> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let s = match v {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (k.clone(), s)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stringifies_each_scalar_kind() {
        let val = json!({ "query": "rust", "count": 5, "confirmed": true, "note": null });
        let map = json_object_to_string_map(&val);
        assert_eq!(map["query"], "rust");
        assert_eq!(map["count"], "5");
        assert_eq!(map["confirmed"], "true");
        assert_eq!(map["note"], "");
    }

    #[test]
    fn non_object_value_yields_empty_map() {
        assert!(json_object_to_string_map(&json!(["not", "an", "object"])).is_empty());
    }
}
