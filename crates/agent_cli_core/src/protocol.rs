//! Control Protocol (component D): outbound request/response
//! correlation and inbound reverse-request dispatch, multiplexed over
//! the same stdio stream that carries data messages.
//!
//! The pending-request registry is adapted from
//! `codex/src/mcp/jsonrpc.rs::JsonRpcTransport`'s `PendingRequests`
//! type alias and `request`/`handle_response` pair, generalized from
//! numeric JSON-RPC ids to this crate's `req_<counter>_<random>`
//! strings and from a single `result`/`error` response shape to this
//! crate's `{response:{subtype,...}}` envelope.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::control::{ControlRequestBody, ControlResponseBody, RequestId};
use crate::error::AgentError;
use crate::hooks::{
    HookCallback, HookDecision, HookInput, HookRegistry, PermissionCallback, PermissionDecision,
    PermissionRequest,
};
use crate::ids::RequestIdGenerator;
use crate::mcp::{McpMessageHandler, McpServerConfig};
use crate::message::{ControlRequestEnvelope, ControlResponseEnvelope, Envelope};
use crate::transport::StdinHandle;

type PendingRequests = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, AgentError>>>>>;

/// `Idle -> Initialized -> Running -> Closed` (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolState {
    Idle,
    Initialized,
    Running,
    Closed,
}

impl ProtocolState {
    fn as_str(self) -> &'static str {
        match self {
            ProtocolState::Idle => "idle",
            ProtocolState::Initialized => "initialized",
            ProtocolState::Running => "running",
            ProtocolState::Closed => "closed",
        }
    }
}

/// Registered reverse-dispatch collaborators, grouped for cheap
/// cloning into each per-request dispatch task.
#[derive(Clone, Default)]
struct ReverseHandlers {
    hooks: HookRegistry,
    permission_callback: Option<PermissionCallback>,
    mcp_servers: Arc<HashMap<String, McpServerConfig>>,
    mcp_handlers: Arc<HashMap<String, McpMessageHandler>>,
}

pub struct ControlProtocol {
    stdin: StdinHandle,
    pending: PendingRequests,
    ids: RequestIdGenerator,
    state: Arc<Mutex<ProtocolState>>,
    handlers: ReverseHandlers,
    cancel: CancellationToken,
}

impl ControlProtocol {
    pub fn new(
        stdin: StdinHandle,
        hooks: HookRegistry,
        permission_callback: Option<PermissionCallback>,
        mcp_servers: HashMap<String, McpServerConfig>,
        mcp_handlers: HashMap<String, McpMessageHandler>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stdin,
            pending: Arc::new(Mutex::new(HashMap::new())),
            ids: RequestIdGenerator::new(),
            state: Arc::new(Mutex::new(ProtocolState::Idle)),
            handlers: ReverseHandlers {
                hooks,
                permission_callback,
                mcp_servers: Arc::new(mcp_servers),
                mcp_handlers: Arc::new(mcp_handlers),
            },
            cancel,
        }
    }

    /// Sent once at connect (§4.D outbound subtypes). Transitions
    /// `Idle -> Initialized -> Running` on success.
    pub async fn initialize(
        &self,
        hooks: Vec<String>,
        mcp_server_names: Vec<String>,
    ) -> Result<Value, AgentError> {
        let response = self
            .send_request(ControlRequestBody::Initialize {
                hooks,
                mcp_servers: mcp_server_names,
                extra: Map::new(),
            })
            .await?;
        self.set_state(ProtocolState::Initialized).await;
        self.set_state(ProtocolState::Running).await;
        Ok(response)
    }

    pub async fn interrupt(&self) -> Result<Value, AgentError> {
        self.ensure_running().await?;
        self.send_request(ControlRequestBody::Interrupt).await
    }

    pub async fn set_model(&self, model: Option<String>) -> Result<Value, AgentError> {
        self.ensure_running().await?;
        self.send_request(ControlRequestBody::SetModel { model }).await
    }

    pub async fn set_permission_mode(&self, mode: String) -> Result<Value, AgentError> {
        self.ensure_running().await?;
        self.send_request(ControlRequestBody::SetPermissionMode { mode }).await
    }

    pub async fn rewind_files(&self, user_message_id: String) -> Result<Value, AgentError> {
        self.ensure_running().await?;
        self.send_request(ControlRequestBody::RewindFiles { user_message_id })
            .await
    }

    pub async fn close(&self) {
        self.set_state(ProtocolState::Closed).await;
        let mut guard = self.pending.lock().await;
        for (_, tx) in guard.drain() {
            let _ = tx.send(Err(AgentError::connection("session closed")));
        }
    }

    async fn set_state(&self, next: ProtocolState) {
        let mut guard = self.state.lock().await;
        debug!(from = guard.as_str(), to = next.as_str(), "protocol state transition");
        *guard = next;
    }

    async fn ensure_running(&self) -> Result<(), AgentError> {
        let state = *self.state.lock().await;
        if state != ProtocolState::Running {
            return Err(AgentError::ProtocolNotReady { state: state.as_str() });
        }
        Ok(())
    }

    /// Outbound request lifecycle (§4.D steps 1-5). Timeouts are the
    /// caller's responsibility; this only races completion against the
    /// session's cancellation token.
    async fn send_request(&self, request: ControlRequestBody) -> Result<Value, AgentError> {
        let request_id = self.ids.next();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        let envelope = Envelope::ControlRequest(ControlRequestEnvelope {
            request_id: request_id.clone(),
            request,
        });
        let bytes = serde_json::to_vec(&envelope)?;
        if let Err(err) = self.stdin.write_line(&bytes).await {
            self.pending.lock().await.remove(&request_id);
            return Err(err);
        }

        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.pending.lock().await.remove(&request_id);
                Err(AgentError::Cancelled)
            }
            outcome = rx => {
                outcome.unwrap_or_else(|_| Err(AgentError::control("control channel closed before a response arrived")))
            }
        }
    }

    /// Router entry point for `control_response` envelopes.
    pub async fn handle_response(&self, envelope: ControlResponseEnvelope) {
        let request_id = envelope.response.request_id().to_string();
        let sender = self.pending.lock().await.remove(&request_id);
        let Some(tx) = sender else {
            debug!(request_id, "control response for unknown or already-resolved request");
            return;
        };
        let outcome = match envelope.response {
            ControlResponseBody::Success { response, .. } => Ok(response.unwrap_or(Value::Null)),
            ControlResponseBody::Error { error, .. } => Err(AgentError::control(error)),
        };
        let _ = tx.send(outcome);
    }

    /// Router entry point for `control_request` envelopes (reverse
    /// requests). Dispatches in its own task (§4.D "Reverse dispatch
    /// runs in its own task") so a slow or panicking callback never
    /// stalls the reader.
    pub fn handle_request(&self, envelope: ControlRequestEnvelope) {
        let stdin = self.stdin.clone();
        let handlers = self.handlers.clone();
        tokio::spawn(async move {
            let request_id = envelope.request_id.clone();
            let outcome = dispatch_reverse_request(envelope.request, &handlers).await;
            let response_body = match outcome {
                Ok(value) => ControlResponseBody::success(request_id, value),
                Err(err) => ControlResponseBody::error(request_id, err.to_string()),
            };
            let response_envelope = Envelope::ControlResponse(ControlResponseEnvelope {
                response: response_body,
            });
            if let Ok(bytes) = serde_json::to_vec(&response_envelope) {
                let _ = stdin.write_line(&bytes).await;
            }
        });
    }
}

async fn dispatch_reverse_request(
    request: ControlRequestBody,
    handlers: &ReverseHandlers,
) -> Result<Value, AgentError> {
    match request {
        ControlRequestBody::CanUseTool {
            tool_name,
            input,
            tool_permission_context,
        } => {
            let callback = handlers
                .permission_callback
                .as_ref()
                .ok_or_else(|| AgentError::control("no permission callback registered"))?;
            let decision = invoke_permission_callback(
                callback,
                PermissionRequest {
                    tool_name,
                    input,
                    tool_permission_context,
                },
            )
            .await?;
            Ok(serde_json::to_value(decision)?)
        }
        ControlRequestBody::HookCallback {
            event,
            tool_name,
            tool_use_id,
            input,
        } => {
            let registration = handlers
                .hooks
                .find(&event, tool_name.as_deref())
                .ok_or_else(|| AgentError::control(format!("no hook registered for event {event}")))?;
            let decision = invoke_hook_callback(
                &registration.callback,
                HookInput {
                    event,
                    tool_name,
                    tool_use_id,
                    input,
                },
            )
            .await?;
            Ok(serde_json::to_value(decision)?)
        }
        ControlRequestBody::McpMessage { server_name, message } => {
            let config = handlers
                .mcp_servers
                .get(&server_name)
                .ok_or_else(|| AgentError::control(format!("unknown mcp server: {server_name}")))?;
            if !config.is_in_process() {
                return Err(AgentError::control(format!(
                    "mcp server {server_name} is not in-process; forwarding is an external collaborator concern"
                )));
            }
            let handler = handlers
                .mcp_handlers
                .get(&server_name)
                .ok_or_else(|| AgentError::control(format!("no handler registered for mcp server {server_name}")))?;
            invoke_mcp_handler(handler, message).await
        }
        other => Err(AgentError::control(format!(
            "unsupported reverse request subtype: {other}"
        ))),
    }
}

/// Panic safety (§9 "Callback panic safety"): the callback runs in its
/// own `tokio::spawn`, whose `JoinError::is_panic()` is how a panicking
/// async callback surfaces here rather than taking down the dispatch
/// task silently.
async fn invoke_permission_callback(
    callback: &PermissionCallback,
    request: PermissionRequest,
) -> Result<PermissionDecision, AgentError> {
    let callback = callback.clone();
    let handle = tokio::spawn(async move { (callback)(request).await });
    handle
        .await
        .map_err(|join_err| AgentError::control(format!("permission callback panicked: {join_err}")))
}

async fn invoke_hook_callback(callback: &HookCallback, input: HookInput) -> Result<HookDecision, AgentError> {
    let callback = callback.clone();
    let handle = tokio::spawn(async move { (callback)(input).await });
    handle
        .await
        .map_err(|join_err| AgentError::control(format!("hook callback panicked: {join_err}")))
}

async fn invoke_mcp_handler(handler: &McpMessageHandler, message: Value) -> Result<Value, AgentError> {
    let handler = handler.clone();
    let handle = tokio::spawn(async move { (handler)(message).await });
    match handle.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(AgentError::control(message)),
        Err(join_err) => Err(AgentError::control(format!("mcp handler panicked: {join_err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::PermissionDecision;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn panicking_permission_callback_yields_error_not_crash() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        let callback: PermissionCallback = Arc::new(move |_req| {
            called_clone.store(true, Ordering::SeqCst);
            Box::pin(async { panic!("deliberate panic for totality test") })
        });
        let result = invoke_permission_callback(
            &callback,
            PermissionRequest {
                tool_name: "Bash".to_string(),
                input: Map::new(),
                tool_permission_context: Value::Null,
            },
        )
        .await;
        assert!(called.load(Ordering::SeqCst));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn allowing_permission_callback_round_trips_decision() {
        let callback: PermissionCallback = Arc::new(|_req| Box::pin(async { PermissionDecision::allow() }));
        let decision = invoke_permission_callback(
            &callback,
            PermissionRequest {
                tool_name: "Read".to_string(),
                input: Map::new(),
                tool_permission_context: Value::Null,
            },
        )
        .await
        .unwrap();
        assert_eq!(decision, PermissionDecision::allow());
    }
}
