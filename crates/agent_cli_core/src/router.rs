//! Message Router and Iterator backbone (component E).
//!
//! Sits between [`crate::transport::Transport`]'s raw, undiscriminated
//! envelope stream and the caller-facing façade. Control envelopes are
//! handed to the [`ControlProtocol`]'s single entry points
//! (`handle_request`/`handle_response`, the spec's
//! `HandleIncomingMessage`); data envelopes are tracked by the
//! [`ToolPairTracker`] and forwarded to the consumer channel.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::message::Envelope;
use crate::protocol::ControlProtocol;
use crate::validator::{ToolPairTracker, ValidatorReport};

/// One-shot iterators close their consumer channel on the first
/// `ResultMessage`; streaming clients keep the channel open across
/// turns and rely on the `ResultMessage` itself as the boundary marker
/// (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterMode {
    OneShot,
    Streaming,
}

pub struct Router {
    validator: ToolPairTracker,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            validator: ToolPairTracker::new(),
        }
    }

    pub fn validator_report(&self) -> ValidatorReport {
        self.validator.report()
    }

    /// Drains `envelopes` until the channel closes, cancellation, or
    /// (in one-shot mode) the first `ResultMessage`. Returns once
    /// `consumer_tx` has no more receivers, so a caller that drops the
    /// iterator unblocks this loop on its next send.
    pub async fn run(
        &mut self,
        mut envelopes: mpsc::Receiver<Envelope>,
        consumer_tx: mpsc::Sender<Envelope>,
        protocol: Option<Arc<ControlProtocol>>,
        mode: RouterMode,
    ) {
        while let Some(envelope) = envelopes.recv().await {
            if envelope.is_control() {
                let Some(protocol) = protocol.as_ref() else {
                    continue;
                };
                match envelope {
                    Envelope::ControlRequest(request) => protocol.handle_request(request),
                    Envelope::ControlResponse(response) => protocol.handle_response(response).await,
                    _ => unreachable!("is_control() only matches these two variants"),
                }
                continue;
            }

            let is_result = envelope.is_result();
            self.validator.observe(&envelope);
            if consumer_tx.send(envelope).await.is_err() {
                return;
            }
            if is_result && mode == RouterMode::OneShot {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ResultMessage, SystemMessage};
    use serde_json::Map;

    fn system_envelope(subtype: &str) -> Envelope {
        Envelope::System(SystemMessage {
            subtype: subtype.to_string(),
            payload: Map::new(),
        })
    }

    fn result_envelope() -> Envelope {
        Envelope::Result(ResultMessage {
            subtype: "final".to_string(),
            duration_ms: 1,
            duration_api_ms: 1,
            is_error: false,
            num_turns: 1,
            session_id: "s1".to_string(),
            total_cost_usd: None,
            usage: None,
            result: None,
            structured_output: None,
        })
    }

    #[tokio::test]
    async fn one_shot_mode_closes_after_first_result() {
        let (raw_tx, raw_rx) = mpsc::channel(10);
        let (consumer_tx, mut consumer_rx) = mpsc::channel(10);

        raw_tx.send(system_envelope("init")).await.unwrap();
        raw_tx.send(result_envelope()).await.unwrap();
        raw_tx.send(system_envelope("should_not_arrive")).await.unwrap();
        drop(raw_tx);

        let mut router = Router::new();
        router.run(raw_rx, consumer_tx, None, RouterMode::OneShot).await;

        let first = consumer_rx.recv().await.unwrap();
        assert!(!first.is_result());
        let second = consumer_rx.recv().await.unwrap();
        assert!(second.is_result());
        assert!(consumer_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn streaming_mode_continues_past_result() {
        let (raw_tx, raw_rx) = mpsc::channel(10);
        let (consumer_tx, mut consumer_rx) = mpsc::channel(10);

        raw_tx.send(result_envelope()).await.unwrap();
        raw_tx.send(system_envelope("second_turn")).await.unwrap();
        drop(raw_tx);

        let mut router = Router::new();
        router.run(raw_rx, consumer_tx, None, RouterMode::Streaming).await;

        let first = consumer_rx.recv().await.unwrap();
        assert!(first.is_result());
        let second = consumer_rx.recv().await.unwrap();
        assert!(!second.is_result());
    }
}
