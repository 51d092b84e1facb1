//! Shared fakes for exercising the loop and router without subprocesses or
//! network access.

use async_trait::async_trait;
use rust_mcp_schema::{CallToolResult, Prompt, Tool};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::api::{
    CompletionOptions, MessageParam, ModelResponse, ModelService, ToolDefinition,
};
use crate::error::AgentError;
use crate::mcp::{CapabilitySession, ResourceContent};

enum CallOutcome {
    Result(Value),
    Failure(String),
}

/// In-memory capability session with scripted tools, prompts, and resources.
pub struct FakeSession {
    id: String,
    tools: Vec<String>,
    calls: HashMap<String, CallOutcome>,
    prompts: HashMap<String, Vec<MessageParam>>,
    resources: HashMap<String, ResourceContent>,
    resource_reads: AtomicUsize,
    last_prompt_request: Mutex<Option<(String, HashMap<String, String>)>>,
}

impl FakeSession {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            tools: Vec::new(),
            calls: HashMap::new(),
            prompts: HashMap::new(),
            resources: HashMap::new(),
            resource_reads: AtomicUsize::new(0),
            last_prompt_request: Mutex::new(None),
        }
    }

    pub fn with_tool(mut self, name: &str) -> Self {
        self.tools.push(name.to_string());
        self
    }

    pub fn with_call_texts(self, name: &str, texts: Vec<&str>) -> Self {
        self.with_call_json(name, texts, false)
    }

    pub fn with_call_error_texts(self, name: &str, texts: Vec<&str>) -> Self {
        self.with_call_json(name, texts, true)
    }

    fn with_call_json(mut self, name: &str, texts: Vec<&str>, is_error: bool) -> Self {
        let content: Vec<Value> = texts
            .into_iter()
            .map(|text| json!({"type": "text", "text": text}))
            .collect();
        self.calls.insert(
            name.to_string(),
            CallOutcome::Result(json!({"content": content, "isError": is_error})),
        );
        self
    }

    pub fn with_call_mixed_content(mut self, name: &str) -> Self {
        self.calls.insert(
            name.to_string(),
            CallOutcome::Result(json!({
                "content": [
                    {"type": "text", "text": "kept"},
                    {"type": "image", "data": "aGk=", "mimeType": "image/png"},
                ],
                "isError": false,
            })),
        );
        self
    }

    pub fn with_call_failure(mut self, name: &str, message: &str) -> Self {
        self.calls
            .insert(name.to_string(), CallOutcome::Failure(message.to_string()));
        self
    }

    pub fn with_prompt_messages(mut self, name: &str, messages: Vec<MessageParam>) -> Self {
        self.prompts.insert(name.to_string(), messages);
        self
    }

    pub fn with_resource(mut self, uri: &str, content: ResourceContent) -> Self {
        self.resources.insert(uri.to_string(), content);
        self
    }

    pub fn resource_reads(&self) -> usize {
        self.resource_reads.load(Ordering::SeqCst)
    }

    pub fn last_prompt_request(&self) -> Option<(String, HashMap<String, String>)> {
        self.last_prompt_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilitySession for FakeSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, AgentError> {
        self.tools
            .iter()
            .map(|name| {
                serde_json::from_value(json!({
                    "name": name,
                    "inputSchema": {"type": "object"},
                }))
                .map_err(|err| AgentError::ProtocolError {
                    server: self.id.clone(),
                    message: err.to_string(),
                })
            })
            .collect()
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, AgentError> {
        self.prompts
            .keys()
            .map(|name| {
                serde_json::from_value(json!({"name": name})).map_err(|err| {
                    AgentError::ProtocolError {
                        server: self.id.clone(),
                        message: err.to_string(),
                    }
                })
            })
            .collect()
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, AgentError> {
        match self.calls.get(name) {
            Some(CallOutcome::Result(value)) => {
                serde_json::from_value(value.clone()).map_err(|err| AgentError::ProtocolError {
                    server: self.id.clone(),
                    message: err.to_string(),
                })
            }
            Some(CallOutcome::Failure(message)) => Err(AgentError::ToolExecutionFailure {
                tool: name.to_string(),
                message: message.clone(),
            }),
            None => Err(AgentError::ToolNotFound {
                tool: name.to_string(),
            }),
        }
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<Vec<MessageParam>, AgentError> {
        *self.last_prompt_request.lock().unwrap() = Some((name.to_string(), arguments));
        self.prompts
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::ProtocolError {
                server: self.id.clone(),
                message: format!("Unknown prompt: {name}"),
            })
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, AgentError> {
        self.resource_reads.fetch_add(1, Ordering::SeqCst);
        self.resources
            .get(uri)
            .cloned()
            .ok_or_else(|| AgentError::ResourceNotFound {
                server: self.id.clone(),
                uri: uri.to_string(),
            })
    }

    async fn close(&self) {}
}

/// Model service that replays a fixed sequence of responses. Requests past
/// the end of the script fail the turn.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<Vec<MessageParam>>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Message snapshots from each completion request, in call order.
    pub fn requests(&self) -> Vec<Vec<MessageParam>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    async fn complete(
        &self,
        messages: &[MessageParam],
        _tools: &[ToolDefinition],
        _options: &CompletionOptions,
    ) -> Result<ModelResponse, AgentError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::model_service("scripted model has no response left"))
    }
}
