//! Parsing of MCP server responses into typed results.

use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{
    CallToolResult, GetPromptResult, InitializeResult, ListPromptsResult, ListToolsResult,
    RpcError,
};
use serde_json::Value;
use std::fmt;

/// JSON-RPC code servers use for a missing resource.
pub(crate) const RESOURCE_NOT_FOUND: i64 = -32002;

/// A failed exchange with the server: either a JSON-RPC error the remote
/// reported, or a response we could not make sense of.
#[derive(Debug)]
pub(crate) enum ServerFailure {
    Rpc { code: i64, message: String },
    Unexpected(String),
}

impl ServerFailure {
    pub(crate) fn is_resource_not_found(&self) -> bool {
        matches!(self, ServerFailure::Rpc { code, .. } if *code == RESOURCE_NOT_FOUND)
    }
}

impl fmt::Display for ServerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerFailure::Rpc { message, .. } => f.write_str(message),
            ServerFailure::Unexpected(message) => f.write_str(message),
        }
    }
}

pub(crate) fn response_value(message: ServerMessage) -> Result<Value, ServerFailure> {
    match message {
        ServerMessage::Response(response) => serde_json::to_value(&response.result)
            .map_err(|err| ServerFailure::Unexpected(err.to_string())),
        ServerMessage::Error(error) => Err(ServerFailure::Rpc {
            code: error.error.code,
            message: format_rpc_error(&error.error),
        }),
        other => Err(ServerFailure::Unexpected(format!(
            "Unexpected MCP server message: {other:?}"
        ))),
    }
}

fn parse_typed<T: serde::de::DeserializeOwned>(message: ServerMessage) -> Result<T, ServerFailure> {
    let value = response_value(message)?;
    serde_json::from_value::<T>(value).map_err(|err| ServerFailure::Unexpected(err.to_string()))
}

pub(crate) fn parse_initialize_result(
    message: ServerMessage,
) -> Result<InitializeResult, ServerFailure> {
    let result: InitializeResult = parse_typed(message)?;
    if result.protocol_version.trim().is_empty() {
        return Err(ServerFailure::Unexpected(
            "Unexpected initialize response.".to_string(),
        ));
    }
    Ok(result)
}

pub(crate) fn parse_list_tools(message: ServerMessage) -> Result<ListToolsResult, ServerFailure> {
    parse_typed(message)
}

pub(crate) fn parse_list_prompts(
    message: ServerMessage,
) -> Result<ListPromptsResult, ServerFailure> {
    parse_typed(message)
}

pub(crate) fn parse_get_prompt(message: ServerMessage) -> Result<GetPromptResult, ServerFailure> {
    parse_typed(message)
}

pub(crate) fn parse_call_tool(message: ServerMessage) -> Result<CallToolResult, ServerFailure> {
    parse_typed(message)
}

/// Pulls the raw `contents` array out of a read-resource response. Media-type
/// resolution happens in [`crate::mcp::content`], off the wire shape rather
/// than the schema binding.
pub(crate) fn parse_read_resource_contents(
    message: ServerMessage,
) -> Result<Vec<Value>, ServerFailure> {
    let value = response_value(message)?;
    match value.get("contents") {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(ServerFailure::Unexpected(
            "Malformed read-resource response.".to_string(),
        )),
        None => Ok(Vec::new()),
    }
}

pub(crate) fn format_rpc_error(error: &RpcError) -> String {
    let mut output = format!("MCP error {}: {}", error.code, error.message);
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()));
        if let Some(details) = details {
            if !details.is_empty() {
                output.push('\n');
                output.push_str(&details);
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server_message(value: Value) -> ServerMessage {
        serde_json::from_value(value).expect("message should parse")
    }

    #[test]
    fn parse_initialize_rejects_blank_protocol_version() {
        let message = server_message(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "capabilities": {},
                "protocolVersion": " ",
                "serverInfo": {"name": "x", "version": "1.0.0"}
            }
        }));
        assert!(parse_initialize_result(message).is_err());
    }

    #[test]
    fn rpc_errors_carry_code_and_message() {
        let message = server_message(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32002, "message": "Resource not found"}
        }));
        let failure = response_value(message).expect_err("should be an error");
        assert!(failure.is_resource_not_found());
        assert!(failure.to_string().contains("Resource not found"));
    }

    #[test]
    fn read_resource_contents_extracts_wire_array() {
        let message = server_message(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "result": {
                "contents": [
                    {"uri": "docs://documents", "mimeType": "application/json", "text": "[]"}
                ]
            }
        }));
        let contents = parse_read_resource_contents(message).expect("should parse");
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["mimeType"], "application/json");
    }

    #[test]
    fn list_tools_parses_typed_result() {
        let message = server_message(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {
                "tools": [
                    {
                        "name": "read_doc_contents",
                        "description": "Read a document",
                        "inputSchema": {"type": "object", "properties": {"doc_id": {"type": "string"}}}
                    }
                ]
            }
        }));
        let list = parse_list_tools(message).expect("should parse");
        assert_eq!(list.tools.len(), 1);
        assert_eq!(list.tools[0].name, "read_doc_contents");
    }
}
