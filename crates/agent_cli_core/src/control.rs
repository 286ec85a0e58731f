//! Control-protocol wire types.
//!
//! `ControlRequestBody` is a single tagged union covering both
//! outbound subtypes (sent by this crate: `initialize`, `interrupt`,
//! `set_model`, `set_permission_mode`, `rewind_files`) and inbound
//! reverse subtypes (sent by the agent: `can_use_tool`,
//! `hook_callback`, `mcp_message` — `mcp_message` can flow either way).
//! One union keeps decode table-driven; [`crate::protocol`] is what
//! actually restricts which subtypes it will *send*.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outbound control request id, `req_<counter>_<random>` (§6).
pub type RequestId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequestBody {
    Initialize {
        #[serde(default)]
        hooks: Vec<String>,
        #[serde(default)]
        mcp_servers: Vec<String>,
        #[serde(default, flatten)]
        extra: Map<String, Value>,
    },
    Interrupt,
    SetModel {
        /// `None` resets to the agent's default model.
        #[serde(default)]
        model: Option<String>,
    },
    SetPermissionMode {
        mode: String,
    },
    RewindFiles {
        user_message_id: String,
    },
    CanUseTool {
        tool_name: String,
        input: Map<String, Value>,
        #[serde(default)]
        tool_permission_context: Value,
    },
    HookCallback {
        event: String,
        #[serde(default)]
        tool_name: Option<String>,
        #[serde(default)]
        tool_use_id: Option<String>,
        input: Value,
    },
    McpMessage {
        server_name: String,
        message: Value,
    },
    /// Subtypes the library does not yet model: kept rather than
    /// rejected, per the spec's "decoders should keep unknown fields
    /// rather than fail unknown subtypes" — only unrecognized `type`
    /// (envelope kind) is a hard parse error, not unrecognized
    /// `subtype`.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ControlRequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlRequestBody::Initialize { .. } => "initialize",
            ControlRequestBody::Interrupt => "interrupt",
            ControlRequestBody::SetModel { .. } => "set_model",
            ControlRequestBody::SetPermissionMode { .. } => "set_permission_mode",
            ControlRequestBody::RewindFiles { .. } => "rewind_files",
            ControlRequestBody::CanUseTool { .. } => "can_use_tool",
            ControlRequestBody::HookCallback { .. } => "hook_callback",
            ControlRequestBody::McpMessage { .. } => "mcp_message",
            ControlRequestBody::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponseBody {
    Success {
        request_id: RequestId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
    Error {
        request_id: RequestId,
        error: String,
    },
}

impl ControlResponseBody {
    pub fn request_id(&self) -> &str {
        match self {
            ControlResponseBody::Success { request_id, .. } => request_id,
            ControlResponseBody::Error { request_id, .. } => request_id,
        }
    }

    pub fn success(request_id: RequestId, response: Value) -> Self {
        ControlResponseBody::Success {
            request_id,
            response: Some(response),
        }
    }

    pub fn error(request_id: RequestId, message: impl Into<String>) -> Self {
        ControlResponseBody::Error {
            request_id,
            error: message.into(),
        }
    }
}

/// Outcome of waiting on an outbound control request, delivered to the
/// caller blocked on it (§4.D, outbound lifecycle step 5).
pub type ControlOutcome = Result<Value, crate::error::AgentError>;
