//! Bavard is a terminal chat agent that lets LLMs call tools exposed by MCP
//! stdio servers.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`api`] defines the model wire payloads and the HTTP completion client.
//! - [`mcp`] owns capability sessions (one subprocess per configured server),
//!   the response decoding helpers, and the tool-routing registry.
//! - [`core`] holds the agentic conversation loop, the document-aware chat
//!   front-end, and configuration persistence.
//!
//! The binary crate (`src/main.rs`) wires these together into an interactive
//! REPL: connect the configured servers, loop on user input, tear the
//! sessions down on exit.

pub mod api;
pub mod core;
pub mod error;
pub mod logging;
pub mod mcp;

#[cfg(test)]
pub(crate) mod test_support;
