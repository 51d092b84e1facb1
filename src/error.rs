//! Crate-level error type.
//!
//! Variants separate the failure domains the application reacts to
//! differently: connection failures are fatal at startup, model-service
//! failures end the turn, and tool failures are folded into tool results so
//! the conversation keeps going.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub enum AgentError {
    /// Spawning or initializing a capability server failed.
    ConnectionFailure { server: String, message: String },

    /// A server replied with something the protocol layer could not accept.
    ProtocolError { server: String, message: String },

    /// A tool call reached its server but did not complete.
    ToolExecutionFailure { tool: String, message: String },

    /// No registered session advertises the requested tool.
    ToolNotFound { tool: String },

    /// The server does not have the requested resource.
    ResourceNotFound { server: String, uri: String },

    /// The completion endpoint failed or returned an unusable response.
    ModelService {
        message: String,
        source: Option<reqwest::Error>,
    },

    /// A single user turn exceeded the configured tool-round cap.
    TurnLimitExceeded { limit: usize },
}

impl AgentError {
    pub fn model_service(message: impl Into<String>) -> Self {
        AgentError::ModelService {
            message: message.into(),
            source: None,
        }
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::ConnectionFailure { server, message } => {
                write!(f, "Failed to connect to MCP server '{server}': {message}")
            }
            AgentError::ProtocolError { server, message } => {
                write!(f, "Protocol error from MCP server '{server}': {message}")
            }
            AgentError::ToolExecutionFailure { tool, message } => {
                write!(f, "Tool '{tool}' failed: {message}")
            }
            AgentError::ToolNotFound { tool } => {
                write!(f, "No server provides tool '{tool}'")
            }
            AgentError::ResourceNotFound { server, uri } => {
                write!(f, "Resource '{uri}' not found on MCP server '{server}'")
            }
            AgentError::ModelService { message, .. } => {
                write!(f, "Model service error: {message}")
            }
            AgentError::TurnLimitExceeded { limit } => {
                write!(f, "Turn aborted after reaching the tool-round limit ({limit})")
            }
        }
    }
}

impl StdError for AgentError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            AgentError::ModelService {
                source: Some(source),
                ..
            } => Some(source),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::ModelService {
            message: err.to_string(),
            source: Some(err),
        }
    }
}
