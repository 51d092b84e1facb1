//! Tool routing across capability sessions.
//!
//! The registry presents the union of every session's tools to the model and
//! dispatches each tool-use request to the first session that advertises the
//! name. Dispatch errors are folded into error-status tool results so the
//! model can react; they never abort a batch.

use rust_mcp_schema::{ContentBlock as McpContentBlock, TextContent};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::CapabilitySession;
use crate::api::{ContentBlock, ToolDefinition, ToolUseRequest};
use crate::error::AgentError;

const TOOL_NOT_FOUND_MESSAGE: &str = "Could not find that tool";

/// Insertion-ordered registry of active sessions. Owns session teardown:
/// `close_all` is the single place sessions are released.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Vec<Arc<dyn CapabilitySession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, session: Arc<dyn CapabilitySession>) {
        self.sessions.push(session);
    }

    pub fn first(&self) -> Option<&Arc<dyn CapabilitySession>> {
        self.sessions.first()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// The union of every session's tools, queried fresh in registry order.
    /// Names are not deduplicated; dispatch resolves the first match.
    pub async fn all_tools(&self) -> Result<Vec<ToolDefinition>, AgentError> {
        let mut tools = Vec::new();
        for session in &self.sessions {
            for tool in session.list_tools().await? {
                let input_schema = serde_json::to_value(&tool.input_schema)
                    .unwrap_or_else(|_| json!({"type": "object"}));
                tools.push(ToolDefinition {
                    name: tool.name,
                    description: tool.description,
                    input_schema,
                });
            }
        }
        debug!(tool_count = tools.len(), "Collected tools across sessions");
        Ok(tools)
    }

    /// Executes tool-use requests one at a time, in emission order, and
    /// returns one result block per request in the same order.
    pub async fn dispatch(&self, requests: &[ToolUseRequest]) -> Vec<ContentBlock> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.dispatch_one(request).await);
        }
        results
    }

    async fn dispatch_one(&self, request: &ToolUseRequest) -> ContentBlock {
        let Some(session) = self.find_owner(&request.name).await else {
            warn!(tool = %request.name, "No session provides requested tool");
            return tool_result(&request.id, TOOL_NOT_FOUND_MESSAGE.to_string(), true);
        };

        debug!(
            tool = %request.name,
            tool_use_id = %request.id,
            server_id = %session.id(),
            "Dispatching tool call"
        );
        let arguments = match &request.input {
            Value::Object(map) => Some(map.clone()),
            Value::Null => None,
            other => {
                warn!(tool = %request.name, input = %other, "Tool input is not a JSON object");
                let payload =
                    json!({"error": format!("Tool input must be a JSON object, got: {other}")})
                        .to_string();
                return tool_result(&request.id, payload, true);
            }
        };
        match session.call_tool(&request.name, arguments).await {
            Ok(outcome) => {
                let texts: Vec<String> = outcome
                    .content
                    .iter()
                    .filter_map(|item| match item {
                        McpContentBlock::TextContent(TextContent { text, .. }) => {
                            Some(text.clone())
                        }
                        _ => None,
                    })
                    .collect();
                let payload = serde_json::to_string(&texts).unwrap_or_else(|_| "[]".to_string());
                tool_result(&request.id, payload, outcome.is_error.unwrap_or(false))
            }
            Err(err) => {
                warn!(tool = %request.name, error = %err, "Tool call failed");
                let payload = json!({"error": err.to_string()}).to_string();
                tool_result(&request.id, payload, true)
            }
        }
    }

    /// First session, in registry order, whose current tool list contains the
    /// name. A session whose listing fails is skipped rather than aborting
    /// the search.
    async fn find_owner(&self, tool_name: &str) -> Option<&Arc<dyn CapabilitySession>> {
        for session in &self.sessions {
            match session.list_tools().await {
                Ok(tools) if tools.iter().any(|tool| tool.name == tool_name) => {
                    return Some(session)
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(server_id = %session.id(), error = %err, "Tool discovery failed during dispatch");
                }
            }
        }
        None
    }

    pub async fn close_all(&self) {
        for session in &self.sessions {
            session.close().await;
        }
    }
}

fn tool_result(tool_use_id: &str, content: String, is_error: bool) -> ContentBlock {
    ContentBlock::ToolResult {
        tool_use_id: tool_use_id.to_string(),
        content,
        is_error,
    }
}
