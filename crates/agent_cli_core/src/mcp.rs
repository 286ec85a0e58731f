//! MCP server **data model** (§6 supplement). This crate only carries
//! these values through to the `initialize` control request's
//! capability payload and uses them to match `mcp_message` reverse
//! requests against in-process servers; it does not generate MCP
//! config files or discover servers on disk (Non-goals, §1).
//!
//! Grounded on `codex/src/mcp/config.rs::McpTransport` (`Stdio` /
//! `StreamableHttp`), generalized with an `Sse` variant (seen on the
//! wire in the reference transport) and an `Sdk` variant for
//! in-process, SDK-side servers the distilled spec's §4.D mentions.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hooks::BoxFuture;

/// Handler for `mcp_message` reverse requests addressed to an
/// in-process (`Sdk`) server. Registered alongside the server's
/// [`McpServerConfig::Sdk`] entry (§4.D step 2, `mcp_message`).
pub type McpMessageHandler = Arc<dyn Fn(Value) -> BoxFuture<Result<Value, String>> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpServerConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// An in-process server implemented by the external collaborator
    /// and registered by name; `mcp_message` reverse requests carrying
    /// this name are forwarded to it rather than over a pipe.
    Sdk { name: String },
}

impl McpServerConfig {
    pub fn is_in_process(&self) -> bool {
        matches!(self, McpServerConfig::Sdk { .. })
    }
}
