//! Subprocess-backed MCP session over stdio.
//!
//! Each session exclusively owns one capability server process and speaks
//! newline-delimited JSON-RPC over its pipes. Requests are correlated through
//! a pending map of oneshot senders fed by a background stdout reader task.

use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, GetPromptRequestParams,
    Implementation, InitializeRequestParams, InitializeResult, PaginatedRequestParams, Prompt,
    ReadResourceRequestParams, RequestId, Tool, LATEST_PROTOCOL_VERSION,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, warn};

use super::content::{prompt_message_param, resource_from_contents, ResourceContent};
use super::protocol::{
    parse_call_tool, parse_get_prompt, parse_initialize_result, parse_list_prompts,
    parse_list_tools, parse_read_resource_contents, ServerFailure,
};
use super::CapabilitySession;
use crate::api::{MessageParam, Role};
use crate::core::config::McpServerConfig;
use crate::error::AgentError;
use async_trait::async_trait;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TOOL_LIST: usize = 100;

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

pub struct McpSession {
    server_id: String,
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    next_request_id: AtomicI64,
    server_details: RwLock<Option<InitializeResult>>,
    child: Mutex<Option<Child>>,
    closed: AtomicBool,
}

impl McpSession {
    /// Spawns the configured server process and performs the initialize
    /// handshake. On failure the session is not usable and the process, if it
    /// started, has been reaped.
    pub async fn connect(config: &McpServerConfig) -> Result<Arc<Self>, AgentError> {
        let session = Self::spawn(config).await.map_err(|message| {
            AgentError::ConnectionFailure {
                server: config.id.clone(),
                message,
            }
        })?;

        if let Err(message) = session.initialize().await {
            session.close().await;
            return Err(AgentError::ConnectionFailure {
                server: config.id.clone(),
                message,
            });
        }
        Ok(session)
    }

    async fn spawn(config: &McpServerConfig) -> Result<Arc<Self>, String> {
        debug!(
            server_id = %config.id,
            command = %config.command,
            args = ?config.args,
            "Starting MCP stdio server"
        );
        let mut cmd = Command::new(&config.command);
        cmd.args(config.args.clone().unwrap_or_default())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(env) = &config.env {
            cmd.envs(env);
        }

        let mut child = cmd.spawn().map_err(|err| err.to_string())?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| "Unable to retrieve stdin.".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Unable to retrieve stdout.".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Unable to retrieve stderr.".to_string())?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let session = Arc::new(Self {
            server_id: config.id.clone(),
            stdin: Mutex::new(stdin),
            pending: pending.clone(),
            next_request_id: AtomicI64::new(0),
            server_details: RwLock::new(None),
            child: Mutex::new(Some(child)),
            closed: AtomicBool::new(false),
        });

        Self::spawn_stdout_reader(pending, stdout, session.server_id.clone());
        Self::spawn_stderr_drain(stderr);
        Ok(session)
    }

    fn spawn_stdout_reader(
        pending: PendingMap,
        stdout: tokio::process::ChildStdout,
        server_id: String,
    ) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let message = match serde_json::from_str::<ServerMessage>(&line) {
                    Ok(message) => message,
                    Err(_) => continue,
                };
                match &message {
                    ServerMessage::Response(response) => {
                        debug!(
                            server_id = %server_id,
                            response_id = ?response.id,
                            "Received MCP stdio response"
                        );
                        if let Some(tx) = pending.lock().await.remove(&response.id) {
                            let _ = tx.send(message);
                        }
                    }
                    ServerMessage::Error(error) => {
                        debug!(
                            server_id = %server_id,
                            error_id = ?error.id,
                            error_code = error.error.code,
                            "Received MCP stdio error"
                        );
                        if let Some(id) = error.id.as_ref() {
                            if let Some(tx) = pending.lock().await.remove(id) {
                                let _ = tx.send(message);
                            }
                        }
                    }
                    ServerMessage::Request(_) | ServerMessage::Notification(_) => {
                        debug!(server_id = %server_id, "Ignoring unsolicited MCP stdio message");
                    }
                }
            }
            // Server exited; unblock any waiters.
            pending.lock().await.clear();
        });
    }

    fn spawn_stderr_drain(stderr: tokio::process::ChildStderr) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(_)) = reader.next_line().await {}
        });
    }

    async fn initialize(&self) -> Result<(), String> {
        let params = InitializeRequestParams {
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Bavard MCP client".to_string()),
                description: None,
                icons: Vec::new(),
                website_url: None,
            },
            meta: None,
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
        };
        let response = self
            .send_request(RequestFromClient::InitializeRequest(params))
            .await?;
        let details = parse_initialize_result(response).map_err(|err| err.to_string())?;
        debug!(
            server_id = %self.server_id,
            protocol_version = %details.protocol_version,
            server_name = %details.server_info.name,
            "MCP handshake complete"
        );
        *self.server_details.write().await = Some(details);
        self.send_notification(NotificationFromClient::InitializedNotification(None))
            .await
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    fn ensure_open(&self) -> Result<(), String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err("MCP session is closed.".to_string());
        }
        Ok(())
    }

    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        self.ensure_open()?;
        let request_id = self.next_request_id();
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| err.to_string())?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request_id.clone(), tx);
        }

        debug!(server_id = %self.server_id, request_id = ?request_id, "Sending MCP stdio request");
        if let Err(err) = self.write_message(&message).await {
            self.pending.lock().await.remove(&request_id);
            return Err(err);
        }

        tokio::select! {
            result = rx => match result {
                Ok(message) => {
                    debug!(server_id = %self.server_id, request_id = ?request_id, "MCP stdio response received");
                    Ok(message)
                }
                Err(_) => Err("MCP stdio response channel closed.".to_string()),
            },
            _ = tokio::time::sleep(REQUEST_TIMEOUT) => {
                self.pending.lock().await.remove(&request_id);
                debug!(
                    server_id = %self.server_id,
                    request_id = ?request_id,
                    timeout_secs = REQUEST_TIMEOUT.as_secs(),
                    "MCP stdio request timed out"
                );
                Err("MCP stdio request timed out.".to_string())
            }
        }
    }

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| err.to_string())?;
        self.write_message(&message).await
    }

    async fn write_message(&self, message: &ClientMessage) -> Result<(), String> {
        let payload = serde_json::to_string(message).map_err(|err| err.to_string())?;
        let mut stdin = match tokio::time::timeout(WRITE_TIMEOUT, self.stdin.lock()).await {
            Ok(stdin) => stdin,
            Err(_) => return Err("Timed out waiting for MCP stdio stdin lock.".to_string()),
        };
        tokio::time::timeout(WRITE_TIMEOUT, stdin.write_all(payload.as_bytes()))
            .await
            .map_err(|_| "Timed out writing MCP stdio request.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(WRITE_TIMEOUT, stdin.write_all(b"\n"))
            .await
            .map_err(|_| "Timed out writing MCP stdio request newline.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(WRITE_TIMEOUT, stdin.flush())
            .await
            .map_err(|_| "Timed out flushing MCP stdio request.".to_string())?
            .map_err(|err| err.to_string())?;
        Ok(())
    }

    fn protocol_error(&self, failure: impl ToString) -> AgentError {
        AgentError::ProtocolError {
            server: self.server_id.clone(),
            message: failure.to_string(),
        }
    }

    async fn fetch_tools_page(
        &self,
        cursor: Option<String>,
    ) -> Result<(Vec<Tool>, Option<String>), ServerFailure> {
        let params = cursor.map(|cursor| PaginatedRequestParams {
            cursor: Some(cursor),
            meta: None,
        });
        let response = self
            .send_request(RequestFromClient::ListToolsRequest(params))
            .await
            .map_err(ServerFailure::Unexpected)?;
        let list = parse_list_tools(response)?;
        Ok((list.tools, list.next_cursor))
    }
}

#[async_trait]
impl CapabilitySession for McpSession {
    fn id(&self) -> &str {
        &self.server_id
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, AgentError> {
        let (mut tools, mut next_cursor) = self
            .fetch_tools_page(None)
            .await
            .map_err(|err| self.protocol_error(err))?;
        while let Some(cursor) = next_cursor.take() {
            if tools.len() >= MAX_TOOL_LIST {
                tools.truncate(MAX_TOOL_LIST);
                break;
            }
            let (page, cursor) = self
                .fetch_tools_page(Some(cursor))
                .await
                .map_err(|err| self.protocol_error(err))?;
            tools.extend(page);
            next_cursor = cursor;
        }
        debug!(server_id = %self.server_id, tool_count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, AgentError> {
        let response = self
            .send_request(RequestFromClient::ListPromptsRequest(None))
            .await
            .map_err(|err| self.protocol_error(err))?;
        let list = parse_list_prompts(response).map_err(|err| self.protocol_error(err))?;
        debug!(server_id = %self.server_id, prompt_count = list.prompts.len(), "Listed MCP prompts");
        Ok(list.prompts)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, AgentError> {
        let mut params = CallToolRequestParams::new(name);
        if let Some(arguments) = arguments {
            params = params.with_arguments(arguments);
        }
        debug!(server_id = %self.server_id, tool = %name, "Calling MCP tool");
        let failure = |message: String| AgentError::ToolExecutionFailure {
            tool: name.to_string(),
            message,
        };
        let response = self
            .send_request(RequestFromClient::CallToolRequest(params))
            .await
            .map_err(failure)?;
        let result = parse_call_tool(response).map_err(|err| failure(err.to_string()))?;
        debug!(
            server_id = %self.server_id,
            tool = %name,
            is_error = result.is_error.unwrap_or(false),
            "MCP tool call completed"
        );
        Ok(result)
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<Vec<MessageParam>, AgentError> {
        let params = GetPromptRequestParams {
            name: name.to_string(),
            arguments: (!arguments.is_empty()).then_some(arguments),
            meta: None,
        };
        let response = self
            .send_request(RequestFromClient::GetPromptRequest(params))
            .await
            .map_err(|err| self.protocol_error(err))?;
        let result = parse_get_prompt(response).map_err(|err| self.protocol_error(err))?;
        debug!(
            server_id = %self.server_id,
            prompt = %name,
            message_count = result.messages.len(),
            "Fetched MCP prompt"
        );

        let mut messages = Vec::with_capacity(result.messages.len());
        for message in result.messages {
            let role = match message.role {
                rust_mcp_schema::Role::User => Role::User,
                rust_mcp_schema::Role::Assistant => Role::Assistant,
            };
            let content = serde_json::to_value(&message.content)
                .map_err(|err| self.protocol_error(err))?;
            messages.push(prompt_message_param(role, &content));
        }
        Ok(messages)
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, AgentError> {
        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };
        let response = self
            .send_request(RequestFromClient::ReadResourceRequest(params))
            .await
            .map_err(|err| self.protocol_error(err))?;
        let contents = match parse_read_resource_contents(response) {
            Ok(contents) => contents,
            Err(failure) if failure.is_resource_not_found() => {
                return Err(AgentError::ResourceNotFound {
                    server: self.server_id.clone(),
                    uri: uri.to_string(),
                })
            }
            Err(failure) => return Err(self.protocol_error(failure)),
        };
        match resource_from_contents(&contents) {
            Some(resolved) => {
                debug!(server_id = %self.server_id, uri = %uri, "Read MCP resource");
                Ok(resolved)
            }
            None => Err(AgentError::ResourceNotFound {
                server: self.server_id.clone(),
                uri: uri.to_string(),
            }),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(server_id = %self.server_id, "Closing MCP session");
        self.pending.lock().await.clear();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.start_kill() {
                warn!(server_id = %self.server_id, error = %err, "Failed to kill MCP server process");
            }
            let _ = child.wait().await;
        }
    }
}
