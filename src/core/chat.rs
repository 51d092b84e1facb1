//! The agentic conversation loop.
//!
//! One user turn drives a completion/dispatch cycle: send the history plus
//! the current tool roster to the model, and while the model stops for tool
//! use, execute the requested tools and feed the results back. The loop ends
//! when the model stops for any other reason.

use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::api::{
    text_of, CompletionOptions, ContentBlock, MessageParam, ModelService, StopReason,
};
use crate::error::AgentError;
use crate::mcp::SessionRegistry;

/// Hook points for surfacing progress while a turn is in flight. The loop
/// calls these between completions; implementations must not block.
pub trait ChatObserver: Send + Sync {
    /// Assistant text that accompanied a tool-use stop. Final text is
    /// returned from `run`, not routed through here.
    fn on_intermediate_text(&self, _text: &str) {}

    /// Called just before a batch of tool calls is dispatched.
    fn on_tool_dispatch(&self, _tool_names: &[String]) {}
}

pub struct NullObserver;

impl ChatObserver for NullObserver {}

pub struct Chat {
    model: Arc<dyn ModelService>,
    registry: Arc<SessionRegistry>,
    options: CompletionOptions,
    max_tool_turns: Option<usize>,
    observer: Arc<dyn ChatObserver>,
    messages: Vec<MessageParam>,
}

impl Chat {
    pub fn new(model: Arc<dyn ModelService>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            model,
            registry,
            options: CompletionOptions::default(),
            max_tool_turns: None,
            observer: Arc::new(NullObserver),
            messages: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_tool_turns(mut self, limit: Option<usize>) -> Self {
        self.max_tool_turns = limit;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ChatObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Full conversation history, oldest first. Append-only: entries are
    /// never rewritten once pushed.
    pub fn messages(&self) -> &[MessageParam] {
        &self.messages
    }

    pub fn push_message(&mut self, message: MessageParam) {
        self.messages.push(message);
    }

    /// Runs one user turn to completion and returns the final assistant
    /// text. On error the history keeps everything appended so far, so a
    /// later turn resumes from a consistent state.
    pub async fn run(&mut self, query: impl Into<String>) -> Result<String, AgentError> {
        self.messages.push(MessageParam::user_text(query));
        self.drive().await
    }

    /// Runs the completion/dispatch cycle against the current history.
    /// Used directly when the opening messages were seeded by a prompt.
    pub async fn drive(&mut self) -> Result<String, AgentError> {
        let mut tool_turns = 0usize;
        loop {
            // Queried fresh each cycle so servers can grow or shrink their
            // tool set mid-turn.
            let tools = self.registry.all_tools().await?;
            let response = self
                .model
                .complete(&self.messages, &tools, &self.options)
                .await?;
            self.messages
                .push(MessageParam::assistant_blocks(response.content.clone()));

            if response.stop_reason != StopReason::ToolUse {
                return Ok(text_of(&response));
            }

            if let Some(limit) = self.max_tool_turns {
                if tool_turns >= limit {
                    // Answer every pending tool_use so the history stays
                    // well-formed for the next turn.
                    let err = AgentError::TurnLimitExceeded { limit };
                    let payload = json!({"error": err.to_string()}).to_string();
                    let results = response
                        .tool_uses()
                        .iter()
                        .map(|request| ContentBlock::ToolResult {
                            tool_use_id: request.id.clone(),
                            content: payload.clone(),
                            is_error: true,
                        })
                        .collect();
                    self.messages.push(MessageParam::user_blocks(results));
                    return Err(err);
                }
            }
            tool_turns += 1;

            let interim = text_of(&response);
            if !interim.is_empty() {
                self.observer.on_intermediate_text(&interim);
            }

            let requests = response.tool_uses();
            let names: Vec<String> = requests.iter().map(|req| req.name.clone()).collect();
            debug!(round = tool_turns, tools = ?names, "Model requested tool use");
            self.observer.on_tool_dispatch(&names);

            let results = self.registry.dispatch(&requests).await;
            self.messages.push(MessageParam::user_blocks(results));
        }
    }
}
