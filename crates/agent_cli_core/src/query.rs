//! One-shot [`Query`] façade (component F).
//!
//! Spawns the agent binary in one-shot mode (§4.C: stdin closed after
//! any initial writes, no control protocol — "one-shot mode has no
//! persistent stdin to correlate against", §4.D) and exposes the
//! response as a lazy sequence, both as a blocking `next()`/`close()`
//! pair (the direct analogue of the source's `Next`/`Close` iterator)
//! and as a real [`Stream`] via `tokio-stream`, grounded on
//! `other_examples/037c7318_citadelgrad-rusty_claw__crates-rusty_claw-src-query.rs.rs`'s
//! `QueryStream` wrapping an `UnboundedReceiverStream`.

use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

use crate::error::AgentError;
use crate::message::Envelope;
use crate::options::AgentOptions;
use crate::router::RouterMode;
use crate::session::{ProcessSpec, Session};
use crate::transport::StdinMode;
use crate::validator::ValidatorReport;

/// A lazy sequence of response messages from one agent turn.
///
/// Not reusable once `close`d or consumed via [`Query::into_stream`]
/// (§3 "Session" lifecycle: "not reusable after disconnect in one-shot
/// mode").
pub struct Query {
    session: Session,
}

impl Query {
    /// Blocks for the next response message. Returns
    /// [`AgentError::NoMoreMessages`] once the response is exhausted,
    /// the sentinel the non-stream accessor uses in place of the
    /// `Stream`/`Iterator` convention of returning `None` (§7).
    pub async fn next(&mut self) -> Result<Envelope, AgentError> {
        match self.session.recv().await {
            Some(result) => result,
            None => Err(AgentError::NoMoreMessages),
        }
    }

    /// Idempotent; terminates the child per the §4.C grace/SIGTERM/
    /// SIGKILL protocol.
    pub async fn close(&mut self) -> Result<(), AgentError> {
        self.session.disconnect().await
    }

    /// Tool-use/tool-result pairing observed over this response, once
    /// the underlying router task has finished. Returns `None` until
    /// the response (or the session) has ended.
    pub async fn validator_report(&mut self) -> Option<ValidatorReport> {
        self.session.validator_report().await
    }

    /// Consumes this `Query`, yielding a [`Stream`] of response
    /// messages — the idiomatic Rust shape for "lazy sequence of
    /// response messages" (§1) alongside the `next`/`close` pair above.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Envelope, AgentError>> {
        let receiver = self.session.take_receiver().unwrap_or_else(|| {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            rx
        });
        ReceiverStream::new(receiver)
    }
}

/// Spawns `process` in one-shot mode with `prompt` appended to its
/// argv (§4.F: "`Query(ctx, prompt, options) → iterator`. Spawns the
/// child in one-shot mode (prompt embedded in argv)"). Argv assembly
/// beyond that append, and agent-binary discovery, remain the external
/// collaborator's job (Non-goals) — `process` arrives with everything
/// else already resolved.
pub async fn query(
    prompt: impl Into<String>,
    mut process: ProcessSpec,
    options: AgentOptions,
) -> Result<Query, AgentError> {
    process.argv.push(prompt.into());

    let mut session = Session::new();
    session
        .connect(
            process,
            &options,
            StdinMode::OneShot,
            RouterMode::OneShot,
            "query",
        )
        .await?;
    Ok(Query { session })
}
