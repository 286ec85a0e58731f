use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::content::MessageContent;
use crate::control::{ControlRequestBody, ControlResponseBody};

/// One top-level JSON object read from the agent's stdout.
///
/// Immutable once parsed; produced by [`crate::parser::EnvelopeParser`]
/// and consumed by [`crate::router::Router`]. Unknown `type` values are
/// a parse error (the spec distinguishes this from unknown *subtypes*,
/// which are tolerated).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    User(UserMessage),
    Assistant(AssistantMessage),
    System(SystemMessage),
    Result(ResultMessage),
    StreamEvent(StreamEvent),
    ControlRequest(ControlRequestEnvelope),
    ControlResponse(ControlResponseEnvelope),
}

impl Envelope {
    /// Data envelopes flow to the Validator and then the consumer;
    /// control envelopes are routed to the Control Protocol instead.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Envelope::ControlRequest(_) | Envelope::ControlResponse(_)
        )
    }

    pub fn is_result(&self) -> bool {
        matches!(self, Envelope::Result(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMessageBody {
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMessage {
    pub message: UserMessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_result: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantMessageBody {
    pub content: MessageContent,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::content::AssistantErrorKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantMessage {
    pub message: AssistantMessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

/// System envelopes carry an extensible payload; the distilled spec's
/// open question notes the agent binary grows `subtype` values over
/// time, so unrecognized fields are preserved rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMessage {
    pub subtype: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageStats {
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

/// Sentinel marking the end of one logical response. Receipt
/// terminates the current response stream even if the child remains
/// alive (§3, "Invariant").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultMessage {
    pub subtype: String,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub is_error: bool,
    pub num_turns: u32,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub uuid: String,
    pub session_id: String,
    pub event: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlRequestEnvelope {
    pub request_id: String,
    pub request: ControlRequestBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlResponseEnvelope {
    pub response: ControlResponseBody,
}

/// The outer object a streaming `Client` writes to stdin (§3
/// "StreamMessage"): a user prompt, an outbound control request, or a
/// control response answering a reverse request. One-shot `Query`
/// never constructs this — its prompt is embedded in argv instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    User { message: UserMessageBody },
    ControlRequest(ControlRequestEnvelope),
    ControlResponse(ControlResponseEnvelope),
}
