//! Internal `Session`: owns `Transport` + optional `ControlProtocol` +
//! `Router` (§4.F "[AMBIENT] both are built over a shared internal
//! `Session` struct"). [`crate::query::Query`] configures one-shot mode
//! (no protocol); [`crate::client::Client`] configures streaming mode
//! (protocol enabled, `initialize` sent at connect).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::message::Envelope;
use crate::options::AgentOptions;
use crate::parser::EnvelopeParser;
use crate::protocol::ControlProtocol;
use crate::router::{Router, RouterMode};
use crate::transport::{SpawnSpec, StdinMode, Transport};
use crate::validator::ValidatorReport;

pub(crate) const CONSUMER_CHANNEL_CAPACITY: usize = 10;

/// Caller-resolved process to spawn (executable, argv, working
/// directory, env). Everything needed to assemble this is the external
/// collaborator's job (binary discovery, flag assembly); `Session` only
/// adds the entrypoint env var and merges `AgentOptions::extra_env`.
pub struct ProcessSpec {
    pub executable: PathBuf,
    pub argv: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

pub(crate) struct Session {
    transport: Transport,
    protocol: Option<Arc<ControlProtocol>>,
    merged_rx: Option<mpsc::Receiver<Result<Envelope, AgentError>>>,
    merge_handle: Option<JoinHandle<()>>,
    router_handle: Option<JoinHandle<Router>>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            transport: Transport::new(),
            protocol: None,
            merged_rx: None,
            merge_handle: None,
            router_handle: None,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.transport.cancellation_token()
    }

    pub(crate) async fn connect(
        &mut self,
        process: ProcessSpec,
        options: &AgentOptions,
        stdin_mode: StdinMode,
        router_mode: RouterMode,
        entrypoint: &str,
    ) -> Result<(), AgentError> {
        let env = build_env(options, &process.env, entrypoint);
        let spec = SpawnSpec {
            executable: process.executable,
            argv: process.argv,
            working_dir: process.working_dir,
            env,
            stdin_mode,
        };

        let parser = Arc::new(EnvelopeParser::new());
        let channels = self.transport.connect(spec, options, parser).await?;

        let protocol = if router_mode == RouterMode::Streaming {
            let stdin = self
                .transport
                .stdin_handle()
                .ok_or_else(|| AgentError::connection("transport connected without a stdin handle"))?;
            Some(Arc::new(ControlProtocol::new(
                stdin,
                options.hooks.clone(),
                options.permission_callback.clone(),
                options
                    .mcp_servers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                options
                    .mcp_handlers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                self.transport.cancellation_token(),
            )))
        } else {
            None
        };

        let (consumer_tx, consumer_rx) = mpsc::channel(CONSUMER_CHANNEL_CAPACITY);
        let router_protocol = protocol.clone();
        let router_handle = tokio::spawn(async move {
            let mut router = Router::new();
            router.run(channels.envelopes, consumer_tx, router_protocol, router_mode).await;
            router
        });

        // Merge the data and parser-error channels into one so callers
        // (and the `Stream` impls in `query`/`client`) see a single
        // `Result<Envelope, AgentError>` item stream, with parser
        // errors prioritized over queued data (§4.F).
        let (merged_tx, merged_rx) = mpsc::channel(CONSUMER_CHANNEL_CAPACITY);
        let mut data_rx = consumer_rx;
        let mut error_rx = channels.errors;
        let merge_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    err = error_rx.recv() => match err {
                        Some(err) => {
                            if merged_tx.send(Err(err)).await.is_err() {
                                return;
                            }
                        }
                        None => break,
                    },
                    envelope = data_rx.recv() => match envelope {
                        Some(envelope) => {
                            if merged_tx.send(Ok(envelope)).await.is_err() {
                                return;
                            }
                        }
                        None => break,
                    },
                }
            }
            // One side closed; drain whichever remains before exiting.
            while let Some(err) = error_rx.recv().await {
                if merged_tx.send(Err(err)).await.is_err() {
                    return;
                }
            }
            while let Some(envelope) = data_rx.recv().await {
                if merged_tx.send(Ok(envelope)).await.is_err() {
                    return;
                }
            }
        });

        self.protocol = protocol;
        self.merged_rx = Some(merged_rx);
        self.merge_handle = Some(merge_handle);
        self.router_handle = Some(router_handle);
        Ok(())
    }

    /// Dispatches the one-time `initialize` control request without
    /// waiting for it to complete. A caller that races ahead with
    /// `set_model`/`interrupt`/etc. immediately after `connect` returns
    /// is meant to observe `ProtocolState::Idle` and get
    /// `AgentError::ProtocolNotReady` rather than implicitly block on
    /// this — see `ControlProtocol::ensure_running`.
    pub(crate) fn spawn_initialize(&self, hook_events: Vec<String>, mcp_server_names: Vec<String>) {
        if let Some(protocol) = self.protocol.clone() {
            tokio::spawn(async move {
                if let Err(err) = protocol.initialize(hook_events, mcp_server_names).await {
                    tracing::warn!(%err, "control protocol initialize failed");
                }
            });
        }
    }

    pub(crate) fn protocol(&self) -> Option<&Arc<ControlProtocol>> {
        self.protocol.as_ref()
    }

    pub(crate) async fn send_line(&self, line: &[u8]) -> Result<(), AgentError> {
        self.transport.send(line).await
    }

    /// Blocks for the next envelope; parser errors take priority over
    /// queued data, enforced by the merge task spawned in `connect`.
    pub(crate) async fn recv(&mut self) -> Option<Result<Envelope, AgentError>> {
        self.merged_rx.as_mut()?.recv().await
    }

    /// Hands ownership of the merged receiver to the caller, for
    /// wrapping in a `tokio_stream::wrappers::ReceiverStream`. After
    /// this, `recv` always returns `None`.
    pub(crate) fn take_receiver(&mut self) -> Option<mpsc::Receiver<Result<Envelope, AgentError>>> {
        self.merged_rx.take()
    }

    pub(crate) async fn disconnect(&mut self) -> Result<(), AgentError> {
        if let Some(protocol) = self.protocol.take() {
            protocol.close().await;
            // Drop this last `StdinHandle` clone before closing the
            // transport, so the child observes stdin EOF immediately
            // rather than only after the grace/SIGTERM/SIGKILL protocol.
            drop(protocol);
        }
        self.transport.close().await?;
        self.merged_rx = None;
        if let Some(handle) = self.merge_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.router_handle.take() {
            handle.abort();
        }
        Ok(())
    }

    pub(crate) async fn validator_report(&mut self) -> Option<ValidatorReport> {
        let handle = self.router_handle.take()?;
        match handle.await {
            Ok(router) => Some(router.validator_report()),
            Err(_) => None,
        }
    }
}

fn build_env(
    options: &AgentOptions,
    request_env: &BTreeMap<String, String>,
    entrypoint: &str,
) -> BTreeMap<String, String> {
    let mut env = request_env.clone();
    for (key, value) in &options.extra_env {
        env.insert(key.clone(), value.clone());
    }
    env.insert("CLAUDE_CODE_ENTRYPOINT".to_string(), entrypoint.to_string());
    if options.enable_file_checkpointing {
        env.insert(
            "CLAUDE_CODE_ENABLE_SDK_FILE_CHECKPOINTING".to_string(),
            "true".to_string(),
        );
    }
    env
}
