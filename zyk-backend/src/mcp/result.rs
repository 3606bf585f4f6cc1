//! Normalization of worker response envelopes.
//!
//! A `tools/call` result arrives in one of several shapes. Each shape has a
//! matcher, and matchers are tried in a fixed priority order; the first one
//! that recognizes the value decides the outcome.

use serde_json::Value;

use super::BridgeError;

/// Outcome of a single shape matcher
#[derive(Debug)]
pub enum Shape {
    Matched(Value),
    Failed(BridgeError),
    NotThisShape,
}

type ShapeMatcher = fn(&Value) -> Shape;

/// Priority order matters: error flags beat payloads, and an empty content
/// list wins before structured content is consulted.
const MATCHERS: &[(&str, ShapeMatcher)] = &[
    ("plain_list", match_plain_list),
    ("error_flag", match_error_flag),
    ("empty_content", match_empty_content),
    ("structured_content", match_structured_content),
    ("nested_result_list", match_nested_result_list),
    ("text_content", match_text_content),
];

/// Validate a selected response document and normalize its `result`.
pub fn parse_response(document: &Value) -> Result<Value, BridgeError> {
    let Some(object) = document.as_object() else {
        return Err(BridgeError::Protocol(format!(
            "response is not a JSON object: {}",
            document
        )));
    };

    if let Some(error) = object.get("error") {
        return Err(BridgeError::Tool(format!("Tool Error: {}", describe_error(error))));
    }

    parse_tool_result(object.get("result").unwrap_or(&Value::Null))
}

/// Normalize a `result` value into a list or object payload.
pub fn parse_tool_result(result: &Value) -> Result<Value, BridgeError> {
    for (name, matcher) in MATCHERS {
        match matcher(result) {
            Shape::Matched(value) => {
                log::debug!("[MCP] Tool result matched shape '{}'", name);
                return Ok(value);
            }
            Shape::Failed(error) => return Err(error),
            Shape::NotThisShape => {}
        }
    }
    Err(BridgeError::Protocol(format!("Unexpected MCP tool result: {}", result)))
}

fn match_plain_list(result: &Value) -> Shape {
    match result {
        Value::Array(_) => Shape::Matched(result.clone()),
        _ => Shape::NotThisShape,
    }
}

fn match_error_flag(result: &Value) -> Shape {
    if result.get("isError").and_then(Value::as_bool) != Some(true) {
        return Shape::NotThisShape;
    }
    let message = first_text_block(result).unwrap_or("MCP tool error");
    Shape::Failed(BridgeError::Tool(message.to_string()))
}

fn match_empty_content(result: &Value) -> Shape {
    match result.get("content").and_then(Value::as_array) {
        Some(blocks) if blocks.is_empty() => {
            log::info!("[MCP] Tool returned an empty content list");
            Shape::Matched(Value::Array(Vec::new()))
        }
        _ => Shape::NotThisShape,
    }
}

fn match_structured_content(result: &Value) -> Shape {
    match result.get("structuredContent") {
        None | Some(Value::Null) => Shape::NotThisShape,
        Some(structured) => match structured.get("result") {
            Some(inner @ Value::Array(_)) => Shape::Matched(inner.clone()),
            _ => Shape::Matched(structured.clone()),
        },
    }
}

fn match_nested_result_list(result: &Value) -> Shape {
    match result.get("result") {
        Some(inner @ Value::Array(_)) => Shape::Matched(inner.clone()),
        _ => Shape::NotThisShape,
    }
}

fn match_text_content(result: &Value) -> Shape {
    let Some(text) = first_text_block(result) else {
        return Shape::NotThisShape;
    };
    match serde_json::from_str(text) {
        Ok(value) => Shape::Matched(value),
        Err(_) => Shape::Failed(BridgeError::Protocol(format!(
            "Unexpected tool result text: {}",
            text
        ))),
    }
}

/// Text of the first `{"type":"text"}` block in a `content` list
pub fn first_text_block(result: &Value) -> Option<&str> {
    result
        .get("content")?
        .as_array()?
        .iter()
        .find(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .map(|block| block.get("text").and_then(Value::as_str).unwrap_or(""))
}

/// All text blocks joined by newlines, for free-text tools such as the browser
pub fn joined_text_blocks(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

pub(crate) fn describe_error(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("message").and_then(Value::as_str) {
            Some(message) => match map.get("code") {
                Some(code) => format!("{} (code {})", message, code),
                None => message.to_string(),
            },
            None => error.to_string(),
        },
        other => other.to_string(),
    }
}

/// Flatten a normalized payload into rows: lists as-is, a lone object as a
/// single row, anything else as nothing.
pub fn into_rows(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(rows) => rows,
        Value::Object(_) => vec![payload],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_list_passes_through() {
        let value = parse_tool_result(&json!([{"a": 1}])).unwrap();
        assert_eq!(value, json!([{"a": 1}]));
    }

    #[test]
    fn test_empty_content_is_empty_list() {
        let value = parse_response(&json!({"result": {"content": [], "isError": false}})).unwrap();
        assert_eq!(value, json!([]));
    }

    #[test]
    fn test_structured_content_result_list() {
        let value = parse_response(&json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {"structuredContent": {"result": [{"id": 1}]}, "content": [{"type": "text", "text": "ignored"}]}
        }))
        .unwrap();
        assert_eq!(value, json!([{"id": 1}]));
    }

    #[test]
    fn test_structured_content_returned_directly() {
        let value = parse_tool_result(&json!({
            "structuredContent": {"diffs": [{"new_path": "a.rs"}]}
        }))
        .unwrap();
        assert_eq!(value, json!({"diffs": [{"new_path": "a.rs"}]}));

        let value = parse_tool_result(&json!({"structuredContent": {"result": "ok"}})).unwrap();
        assert_eq!(value, json!({"result": "ok"}));
    }

    #[test]
    fn test_nested_result_list() {
        let value = parse_tool_result(&json!({"result": [1, 2]})).unwrap();
        assert_eq!(value, json!([1, 2]));
    }

    #[test]
    fn test_text_content_is_parsed_as_json() {
        let value = parse_tool_result(&json!({
            "content": [
                {"type": "image", "data": "..."},
                {"type": "text", "text": "[{\"Database\": \"dispensing\"}]"}
            ]
        }))
        .unwrap();
        assert_eq!(value, json!([{"Database": "dispensing"}]));
    }

    #[test]
    fn test_unparseable_text_is_a_failure() {
        let err = parse_tool_result(&json!({"content": [{"type": "text", "text": "not json"}]}))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(ref m) if m.contains("not json")));
    }

    #[test]
    fn test_error_flag_raises_first_text() {
        let err = parse_tool_result(&json!({
            "isError": true,
            "content": [{"type": "text", "text": "Access denied for user"}]
        }))
        .unwrap_err();
        assert!(matches!(err, BridgeError::Tool(ref m) if m == "Access denied for user"));

        let err = parse_tool_result(&json!({"isError": true, "content": []})).unwrap_err();
        assert!(matches!(err, BridgeError::Tool(ref m) if m == "MCP tool error"));
    }

    #[test]
    fn test_error_flag_beats_structured_content() {
        let err = parse_tool_result(&json!({
            "isError": true,
            "structuredContent": {"result": []},
            "content": [{"type": "text", "text": "boom"}]
        }))
        .unwrap_err();
        assert!(matches!(err, BridgeError::Tool(_)));
    }

    #[test]
    fn test_top_level_error_is_tool_failure() {
        let err = parse_response(&json!({
            "id": 2,
            "error": {"code": -32601, "message": "Unknown tool"}
        }))
        .unwrap_err();
        assert!(matches!(err, BridgeError::Tool(ref m) if m.contains("Unknown tool")));
    }

    #[test]
    fn test_unknown_shapes_fail() {
        assert!(matches!(
            parse_tool_result(&json!({"foo": 1})),
            Err(BridgeError::Protocol(_))
        ));
        assert!(matches!(parse_tool_result(&Value::Null), Err(BridgeError::Protocol(_))));
        assert!(matches!(
            parse_response(&json!(["not", "an", "object"])),
            Err(BridgeError::Protocol(_))
        ));
    }

    #[test]
    fn test_into_rows() {
        assert_eq!(into_rows(json!([1, 2])).len(), 2);
        assert_eq!(into_rows(json!({"a": 1})).len(), 1);
        assert!(into_rows(json!("text")).is_empty());
    }
}
