//! Persistent, bidirectional [`Client`] façade (component F).
//!
//! Built over the same internal `Session` as [`crate::query::Query`],
//! configured for streaming mode: stdin stays open for the session's
//! lifetime, a `ControlProtocol` is attached and `initialize`d at
//! connect, and the router keeps forwarding envelopes across turns
//! instead of closing on the first `ResultMessage` (§4.F).

use std::sync::Arc;

use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

use crate::content::MessageContent;
use crate::error::AgentError;
use crate::message::{Envelope, StreamMessage, UserMessageBody};
use crate::options::AgentOptions;
use crate::protocol::ControlProtocol;
use crate::router::RouterMode;
use crate::session::{ProcessSpec, Session};
use crate::transport::StdinMode;
use crate::validator::ValidatorReport;

/// A persistent session: `Connect`, then any number of `query` /
/// `receive_messages` turns, then `Disconnect` (§3 "Session" lifecycle
/// — "reusable across turns in streaming mode").
pub struct Client {
    session: Session,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self {
            session: Session::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Spawns `process` in streaming mode and returns as soon as the
    /// transport and control protocol are attached. The one `initialize`
    /// control request (§4.D outbound subtypes, registering this
    /// client's hook event names and MCP server names with the agent)
    /// is dispatched in the background rather than awaited here: a
    /// caller that races ahead with `set_model`/`interrupt`/etc. before
    /// it completes is expected to observe `AgentError::ProtocolNotReady`.
    pub async fn connect(&mut self, process: ProcessSpec, options: &AgentOptions) -> Result<(), AgentError> {
        self.session
            .connect(process, options, StdinMode::Streaming, RouterMode::Streaming, "client")
            .await?;
        self.session.spawn_initialize(
            options.hooks.event_names(),
            options.mcp_servers.keys().cloned().collect(),
        );
        Ok(())
    }

    /// Serializes `prompt` into a `StreamMessage` and writes it;
    /// does not block for a reply (§4.F "`Query` serializes a user
    /// prompt into a StreamMessage and writes it; does not block for a
    /// reply"). The caller drains [`Client::receive_messages`] for the
    /// response.
    pub async fn query(&self, prompt: impl Into<String>) -> Result<(), AgentError> {
        let message = StreamMessage::User {
            message: UserMessageBody {
                content: MessageContent::Text(prompt.into()),
            },
        };
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        self.session.send_line(&line).await
    }

    /// Blocks for the next message. The channel stays open across
    /// turns and closes only on disconnect; a `ResultMessage` marks
    /// the boundary between turns rather than ending the stream.
    pub async fn receive_messages(&mut self) -> Option<Result<Envelope, AgentError>> {
        self.session.recv().await
    }

    /// Consumes this `Client`, yielding a [`Stream`] over the same
    /// channel `receive_messages` would drain.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Envelope, AgentError>> {
        let receiver = self.session.take_receiver().unwrap_or_else(|| {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            rx
        });
        ReceiverStream::new(receiver)
    }

    pub async fn interrupt(&self) -> Result<(), AgentError> {
        self.protocol()?.interrupt().await.map(|_| ())
    }

    pub async fn set_model(&self, model: Option<String>) -> Result<(), AgentError> {
        self.protocol()?.set_model(model).await.map(|_| ())
    }

    pub async fn set_permission_mode(&self, mode: impl Into<String>) -> Result<(), AgentError> {
        self.protocol()?.set_permission_mode(mode.into()).await.map(|_| ())
    }

    pub async fn rewind_files(&self, user_message_id: impl Into<String>) -> Result<(), AgentError> {
        self.protocol()?
            .rewind_files(user_message_id.into())
            .await
            .map(|_| ())
    }

    /// Tool-use/tool-result pairing observed so far, once the router
    /// task has finished (after `disconnect`).
    pub async fn validator_report(&mut self) -> Option<ValidatorReport> {
        self.session.validator_report().await
    }

    pub async fn disconnect(&mut self) -> Result<(), AgentError> {
        self.session.disconnect().await
    }

    fn protocol(&self) -> Result<&Arc<ControlProtocol>, AgentError> {
        self.session
            .protocol()
            .ok_or_else(|| AgentError::control("client is not connected"))
    }
}
