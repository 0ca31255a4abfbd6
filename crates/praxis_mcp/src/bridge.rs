use praxis_core::{RemoteCallResult, RemoteTool};
use rmcp::model::{CallToolResult, RawContent};
use serde_json::Value;

/// Convert a tool discovered via `list_all_tools()` into a catalog entry.
///
/// The input schema is passed through raw; the registry normalizes it.
pub fn remote_tool(server_id: &str, tool: &rmcp::model::Tool) -> RemoteTool {
    RemoteTool {
        server_id: server_id.to_string(),
        name: tool.name.to_string(),
        description: tool
            .description
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default(),
        input_schema: Value::Object((*tool.input_schema).clone()),
        output_schema: tool
            .output_schema
            .as_ref()
            .map(|s| Value::Object((**s).clone())),
    }
}

/// Convert an MCP call result. Structured content wins over text blocks,
/// which are joined with newlines.
pub fn call_result(result: CallToolResult) -> RemoteCallResult {
    let is_error = result.is_error.unwrap_or(false);

    if let Some(structured) = result.structured_content {
        return RemoteCallResult {
            content: structured,
            is_error,
        };
    }

    let text = result
        .content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    RemoteCallResult {
        content: Value::String(text),
        is_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_remote_tool_keeps_raw_schema() {
        let schema = json!({"type": "None", "properties": {"q": {"type": "None"}}});
        let tool = rmcp::model::Tool::new(
            "web_search_v2",
            "Search the web",
            Arc::new(schema.as_object().unwrap().clone()),
        );
        let remote = remote_tool("search", &tool);
        assert_eq!(remote.server_id, "search");
        assert_eq!(remote.name, "web_search_v2");
        assert_eq!(remote.description, "Search the web");
        assert_eq!(remote.input_schema, schema);
    }

    #[test]
    fn test_call_result_joins_text_blocks() {
        let result = CallToolResult::success(vec![Content::text("line one"), Content::text("line two")]);
        let converted = call_result(result);
        assert!(!converted.is_error);
        assert_eq!(converted.content, json!("line one\nline two"));
    }

    #[test]
    fn test_call_result_error_flag() {
        let result = CallToolResult::error(vec![Content::text("rate limited")]);
        let converted = call_result(result);
        assert!(converted.is_error);
        assert_eq!(converted.content, json!("rate limited"));
    }
}
