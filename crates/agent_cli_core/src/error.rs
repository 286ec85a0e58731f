use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::control::RequestId;

/// Error taxonomy for the agent CLI core.
///
/// Variants map to the kinds described by the control-protocol and
/// transport specs rather than to individual call sites: a parse
/// failure from a malformed envelope and a parse failure from a
/// missing required field are both `Parse`, distinguished by the
/// offending JSON carried inside.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The external collaborator handed us a path that did not resolve.
    #[error("agent CLI binary not found at {path:?}")]
    CliNotFound { path: PathBuf },

    /// Spawn, pipe setup, or working-directory resolution failed.
    #[error("failed to connect to agent CLI: {0}")]
    Connection(String),

    /// `Connect` called on an already-connected transport.
    #[error("transport is already connected")]
    AlreadyConnected,

    /// A parsed envelope was malformed or missing a required field.
    #[error("failed to parse agent message: {reason}")]
    Parse { reason: String, offending: Value },

    /// The streaming parser's 1 MiB buffer was exceeded without a
    /// complete top-level JSON value.
    #[error("json buffer overflow: attempted size {attempted_size} bytes exceeds cap")]
    BufferOverflow { attempted_size: usize },

    /// The child exited with a non-zero status.
    #[error("agent CLI exited with status {exit_code:?}: {stderr}")]
    Process {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// A reverse-protocol response carried an error subtype, or an
    /// outbound control request timed out or was cancelled.
    #[error("control protocol error: {0}")]
    Control(String),

    /// `set_model` / `set_permission_mode` / `interrupt` / `rewind_files`
    /// called before the control protocol reached `Running`.
    #[error("control protocol is not ready (state: {state})")]
    ProtocolNotReady { state: &'static str },

    /// A registered `can_use_tool` callback denied the request, or a
    /// callback itself failed/panicked.
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// Sentinel returned by the non-stream accessors once a response
    /// stream has been fully consumed. `Iterator`/`Stream` impls use
    /// `None` instead; this variant exists for callers that prefer a
    /// named error over an `Option`.
    #[error("no more messages in this response")]
    NoMoreMessages,

    /// A caller-supplied cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// An outbound control request exceeded its caller-imposed deadline.
    #[error("control request {request_id} timed out after {timeout:?}")]
    Timeout {
        request_id: RequestId,
        timeout: Duration,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    pub fn connection(msg: impl Into<String>) -> Self {
        AgentError::Connection(msg.into())
    }

    pub fn control(msg: impl Into<String>) -> Self {
        AgentError::Control(msg.into())
    }

    /// True for failures that mean the underlying session is no longer
    /// usable (as opposed to e.g. a single malformed envelope).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::Connection(_)
                | AgentError::Process { .. }
                | AgentError::AlreadyConnected
                | AgentError::Cancelled
        )
    }
}
