//! Tool-Call Handler (C7): normalizes LLM tool-call dialects into one shape
//! before they reach the Execution Service.
//!
//! Two dialects are accepted on the stdio RPC surface:
//!   - OpenAI-style: `{"id":..,"type":"function","function":{"name":..,"arguments":"<json string>"}}`
//!   - Anthropic-style: `{"type":"tool_use","id":..,"name":..,"input":{..}}`
//!
//! Both decode into `ToolCall{id, name, arguments}`; only the caller's
//! response formatting is dialect-specific, not the dispatch.

use anyhow::{Context, Result};
use serde_json::{json, Value};

/// Which dialect a tool call arrived in, so the response can be formatted
/// back the way that dialect expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallDialect {
    /// OpenAI-style `function` call / tool message.
    OpenAi,
    /// Anthropic-style `tool_use` / `tool_result` block.
    Anthropic,
}

/// A tool call normalized from either supported dialect.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub dialect: ToolCallDialect,
}

/// Decode a raw tool-call payload into the internal representation.
///
/// Accepts OpenAI's `function`-wrapped shape (arguments as a JSON-encoded
/// string) or Anthropic's flat `tool_use` shape (arguments as a JSON object).
pub fn decode_tool_call(raw: &Value) -> Result<ToolCall> {
    let obj = raw.as_object().context("tool call must be a JSON object")?;

    if let Some(function) = obj.get("function") {
        // OpenAI dialect
        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let name = function
            .get("name")
            .and_then(|v| v.as_str())
            .context("function.name required")?
            .to_string();
        let arguments = match function.get("arguments") {
            Some(Value::String(s)) => {
                serde_json::from_str(s).context("function.arguments is not valid JSON")?
            }
            Some(v) => v.clone(),
            None => Value::Object(serde_json::Map::new()),
        };
        return Ok(ToolCall { id, name, arguments, dialect: ToolCallDialect::OpenAi });
    }

    if obj.get("type").and_then(|v| v.as_str()) == Some("tool_use") || obj.contains_key("input") {
        // Anthropic dialect
        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let name = obj
            .get("name")
            .and_then(|v| v.as_str())
            .context("name required")?
            .to_string();
        let arguments = obj
            .get("input")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        return Ok(ToolCall { id, name, arguments, dialect: ToolCallDialect::Anthropic });
    }

    anyhow::bail!("unrecognized tool call shape: missing 'function' or 'input'/'tool_use' fields")
}

/// Format a handler outcome back into the envelope the call's originating
/// dialect expects, carrying the call's `id` and an `is_error` flag.
///
/// - OpenAI dialect: a tool message whose `content` is the serialized JSON
///   result, with `is_error` set on failure.
/// - Anthropic dialect: a `tool_result` content block with `tool_use_id`
///   matching the call's `id`.
pub fn format_tool_result(call: &ToolCall, result: &Result<Value>) -> Value {
    let (is_error, payload) = match result {
        Ok(v) => (false, v.clone()),
        Err(e) => (true, json!({ "error": e.to_string() })),
    };
    let content = payload.to_string();

    match call.dialect {
        ToolCallDialect::OpenAi => json!({
            "role": "tool",
            "tool_call_id": call.id,
            "content": content,
            "is_error": is_error,
        }),
        ToolCallDialect::Anthropic => json!({
            "type": "tool_result",
            "tool_use_id": call.id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_openai_dialect() {
        let raw = json!({
            "id": "call_1",
            "type": "function",
            "function": {
                "name": "execute_code",
                "arguments": "{\"skill_dir\":\"/tmp/s\",\"input_json\":\"{}\"}"
            }
        });
        let call = decode_tool_call(&raw).unwrap();
        assert_eq!(call.id, "call_1");
        assert_eq!(call.name, "execute_code");
        assert_eq!(call.arguments["skill_dir"], "/tmp/s");
        assert_eq!(call.dialect, ToolCallDialect::OpenAi);
    }

    #[test]
    fn decodes_anthropic_dialect() {
        let raw = json!({
            "type": "tool_use",
            "id": "toolu_1",
            "name": "scan_code",
            "input": {"script_path": "/tmp/s/main.py"}
        });
        let call = decode_tool_call(&raw).unwrap();
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.name, "scan_code");
        assert_eq!(call.arguments["script_path"], "/tmp/s/main.py");
        assert_eq!(call.dialect, ToolCallDialect::Anthropic);
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let raw = json!({"foo": "bar"});
        assert!(decode_tool_call(&raw).is_err());
    }

    #[test]
    fn formats_openai_result_envelope() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "scan_code".to_string(),
            arguments: Value::Null,
            dialect: ToolCallDialect::OpenAi,
        };
        let result: Result<Value> = Ok(json!({"is_safe": true}));
        let envelope = format_tool_result(&call, &result);
        assert_eq!(envelope["tool_call_id"], "call_1");
        assert_eq!(envelope["is_error"], false);
        assert!(envelope["content"].is_string());
    }

    #[test]
    fn formats_anthropic_error_envelope() {
        let call = ToolCall {
            id: "toolu_1".to_string(),
            name: "execute_code".to_string(),
            arguments: Value::Null,
            dialect: ToolCallDialect::Anthropic,
        };
        let result: Result<Value> = Err(anyhow::anyhow!("boom"));
        let envelope = format_tool_result(&call, &result);
        assert_eq!(envelope["type"], "tool_result");
        assert_eq!(envelope["tool_use_id"], "toolu_1");
        assert_eq!(envelope["is_error"], true);
    }
}
