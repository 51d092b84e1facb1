//! Outbound model service client.
//!
//! `ModelClient` owns the single call contract to the LLM endpoint: it builds
//! the request from history, tool schemas, and sampling options, and
//! normalizes the response. Transport and remote errors surface to the caller
//! unmodified; retry policy, if any, belongs to the surrounding application.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{
    MessageParam, MessagesRequest, ModelResponse, ThinkingParam, ToolDefinition,
};
use crate::error::AgentError;

const DEFAULT_MAX_TOKENS: u32 = 8000;
const HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const HTTP_REQUEST_TIMEOUT_SECONDS: u64 = 300;
const API_VERSION: &str = "2023-06-01";

/// Sampling options for one completion call.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub stop_sequences: Vec<String>,
    pub system: Option<String>,
    /// Thinking-mode token budget; the thinking parameter is only attached to
    /// the request when this is set.
    pub thinking_budget: Option<u32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            stop_sequences: Vec::new(),
            system: None,
            thinking_budget: None,
        }
    }
}

/// The model service seam. The conversation loop only depends on this trait,
/// so tests can drive it with a scripted double.
#[async_trait]
pub trait ModelService: Send + Sync {
    async fn complete(
        &self,
        messages: &[MessageParam],
        tools: &[ToolDefinition],
        options: &CompletionOptions,
    ) -> Result<ModelResponse, AgentError>;
}

pub struct ModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ModelClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECONDS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(AgentError::from)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

pub(crate) fn build_request<'a>(
    model: &'a str,
    max_tokens: u32,
    messages: &'a [MessageParam],
    tools: &'a [ToolDefinition],
    options: &'a CompletionOptions,
) -> MessagesRequest<'a> {
    MessagesRequest {
        model,
        max_tokens,
        messages,
        temperature: options.temperature,
        stop_sequences: &options.stop_sequences,
        tools: (!tools.is_empty()).then_some(tools),
        system: options.system.as_deref(),
        thinking: options.thinking_budget.map(ThinkingParam::enabled),
    }
}

#[async_trait]
impl ModelService for ModelClient {
    async fn complete(
        &self,
        messages: &[MessageParam],
        tools: &[ToolDefinition],
        options: &CompletionOptions,
    ) -> Result<ModelResponse, AgentError> {
        let request = build_request(&self.model, self.max_tokens, messages, tools, options);
        debug!(
            model = %self.model,
            message_count = messages.len(),
            tool_count = tools.len(),
            temperature = options.temperature,
            has_system = options.system.is_some(),
            "Sending model request"
        );

        let response = self
            .http
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::model_service(format!(
                "HTTP {status}: {body}"
            )));
        }

        let parsed: ModelResponse = response.json().await?;
        debug!(
            stop_reason = ?parsed.stop_reason,
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "Received model response"
        );
        Ok(parsed)
    }
}
