//! Model Context Protocol integration: subprocess sessions, content
//! normalization, and tool routing across sessions.

use async_trait::async_trait;
use rust_mcp_schema::{CallToolResult, Prompt, Tool};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::api::MessageParam;
use crate::error::AgentError;

pub mod content;
pub mod protocol;
pub mod router;
pub mod session;

pub use content::ResourceContent;
pub use router::SessionRegistry;
pub use session::McpSession;

/// One capability server session. `McpSession` is the stdio subprocess
/// implementation; tests drive the router and the chat loop through fakes.
#[async_trait]
pub trait CapabilitySession: Send + Sync {
    fn id(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<Tool>, AgentError>;

    async fn list_prompts(&self) -> Result<Vec<Prompt>, AgentError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, AgentError>;

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<Vec<MessageParam>, AgentError>;

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, AgentError>;

    /// Releases the underlying transport. Idempotent.
    async fn close(&self);
}
