//! Conversion of raw agent replies into `ToolResult`

use neurone_core::protocol::{AgentToolResult, ContentKind};
use neurone_core::{ToolError, ToolResult};
use serde_json::Value;

const SEPARATOR: &str = " | ";
const DEFAULT_FAILURE: &str = "tool execution failed";

fn join_texts(raw: &AgentToolResult, errors: bool) -> String {
    raw.content
        .iter()
        .filter(|item| (item.kind == ContentKind::Error) == errors && !item.text.is_empty())
        .map(|item| item.text.as_str())
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// Normalize an agent reply.
///
/// Errors join the `error` items, successes join every other item and
/// decode the text as JSON when possible.
pub fn normalize(raw: AgentToolResult) -> ToolResult {
    if raw.is_error {
        let mut message = join_texts(&raw, true);
        if message.is_empty() {
            message = DEFAULT_FAILURE.to_string();
        }
        return ToolResult::fail(ToolError::execution_failed(message));
    }

    let text = join_texts(&raw, false);
    if text.is_empty() {
        return ToolResult::ok(raw.data.unwrap_or(Value::Null));
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(data) => ToolResult::ok(data),
        Err(_) => ToolResult::ok(Value::String(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurone_core::protocol::ContentItem;
    use neurone_core::ErrorCode;
    use serde_json::json;

    fn reply(content: Vec<ContentItem>, is_error: bool) -> AgentToolResult {
        AgentToolResult {
            content,
            is_error,
            data: None,
        }
    }

    #[test]
    fn test_json_text_becomes_data() {
        let result = normalize(reply(vec![ContentItem::text(r#"{"a":1}"#)], false));
        assert!(result.is_success());
        assert_eq!(result.data(), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_error_text_becomes_message() {
        let result = normalize(reply(vec![ContentItem::error("boom")], true));
        let error = result.error().unwrap();
        assert_eq!(error.code, ErrorCode::ExecutionFailed);
        assert_eq!(error.message, "boom");
    }

    #[test]
    fn test_plain_text_falls_back_to_string() {
        let result = normalize(reply(vec![ContentItem::text("clicked #a")], false));
        assert_eq!(result.data(), Some(&json!("clicked #a")));
    }

    #[test]
    fn test_multiple_items_are_joined() {
        let result = normalize(reply(
            vec![
                ContentItem::error("timeout waiting for #a"),
                ContentItem::text("ignored"),
                ContentItem::error("page crashed"),
            ],
            true,
        ));
        assert_eq!(
            result.error().unwrap().message,
            "timeout waiting for #a | page crashed"
        );
    }

    #[test]
    fn test_error_without_text_has_default_message() {
        let result = normalize(reply(vec![], true));
        assert_eq!(result.error().unwrap().message, "tool execution failed");
    }

    #[test]
    fn test_error_ignores_text_items() {
        let result = normalize(reply(vec![ContentItem::text("partial")], true));
        assert_eq!(result.error().unwrap().message, "tool execution failed");
    }

    #[test]
    fn test_success_joins_every_non_error_item() {
        let other = ContentItem {
            kind: ContentKind::Other,
            text: "resource".to_string(),
        };
        let result = normalize(reply(
            vec![
                ContentItem::text("clicked"),
                other,
                ContentItem::error("stale warning"),
            ],
            false,
        ));
        assert_eq!(result.data(), Some(&json!("clicked | resource")));
    }

    #[test]
    fn test_empty_success_uses_data_field() {
        let raw = AgentToolResult {
            content: vec![],
            is_error: false,
            data: Some(json!({"tabs": []})),
        };
        assert_eq!(normalize(raw).data(), Some(&json!({"tabs": []})));
        assert_eq!(normalize(reply(vec![], false)).data(), Some(&Value::Null));
    }
}
