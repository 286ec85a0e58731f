//! Core transport, streaming parser, and control protocol for driving
//! an interactive agent CLI as a managed child process.
//!
//! This crate does not know how to discover the agent binary, assemble
//! its argv, or render MCP server configuration to disk — callers own
//! that (see the crate README). What it owns is everything downstream
//! of "here is a resolved command to spawn": framing the child's
//! stdout into typed messages, keeping the child alive and reapable,
//! running the bidirectional control protocol over shared stdio, and
//! presenting both a one-shot [`query::Query`] iterator and a
//! persistent [`client::Client`] session on top of the same transport.

pub mod content;
pub mod control;
pub mod error;
pub mod hooks;
pub mod ids;
pub mod mcp;
pub mod message;
pub mod options;
pub mod parser;
pub mod protocol;
pub mod router;
mod session;
pub mod transport;
pub mod validator;

pub mod client;
pub mod query;

pub use client::Client;
pub use content::{AssistantErrorKind, ContentBlock, MessageContent, ToolResultContent};
pub use error::AgentError;
pub use message::{
    AssistantMessage, Envelope, ResultMessage, StreamEvent, StreamMessage, SystemMessage,
    UserMessage,
};
pub use options::AgentOptions;
pub use query::{query, Query};
pub use session::ProcessSpec;
