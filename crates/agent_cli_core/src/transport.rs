//! Subprocess Transport (component C).
//!
//! Spawn-with-retry and environment plumbing are ported from
//! `claude_code/src/process.rs::{spawn_with_retry, apply_env}`, itself
//! mirrored almost verbatim in `codex/src/mcp/jsonrpc.rs`'s spawn loop
//! — the same defensive retry-on-`ETXTBSY` shows up in both teacher
//! crates, so it is load-bearing rather than incidental. The
//! reader/stderr task split follows `jsonrpc.rs`'s
//! `reader_task`/`stderr_task` shape, generalized to feed this crate's
//! [`EnvelopeParser`] instead of a line-oriented JSON-RPC decoder — the
//! parser already tolerates arbitrary chunk boundaries, so the reader
//! here hands it raw read buffers rather than pre-splitting on
//! newlines.

use std::collections::BTreeMap;
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AgentError;
use crate::message::Envelope;
use crate::options::{AgentOptions, StderrCallback};
use crate::parser::EnvelopeParser;

const GRACE_PERIOD: Duration = Duration::from_secs(5);
const STDOUT_CHUNK: usize = 1 << 20;
const DATA_CHANNEL_CAPACITY: usize = 10;

/// §4.C "One-shot vs. streaming mode."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinMode {
    OneShot,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Disconnected,
    Connecting,
    Connected,
    Terminating,
}

impl LifecycleState {
    fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Disconnected => "disconnected",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Connected => "connected",
            LifecycleState::Terminating => "terminating",
        }
    }
}

pub struct SpawnSpec {
    pub executable: PathBuf,
    pub argv: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub stdin_mode: StdinMode,
}

/// Output of a successful [`Transport::connect`]: the raw envelope
/// channel (both data and control envelopes, undiscriminated — that is
/// [`crate::router::Router`]'s job) and the parser-error channel
/// (§4.C "Failure semantics: parser errors are forwarded on a separate
/// error channel").
pub struct ConnectedChannels {
    pub envelopes: mpsc::Receiver<Envelope>,
    pub errors: mpsc::Receiver<AgentError>,
}

/// Cloneable handle onto the child's serialized stdin path (§9 "Shared
/// stdin writer"). [`crate::protocol::ControlProtocol`] is handed one
/// of these rather than the whole `Transport`, so it can write without
/// needing `&mut Transport` (which `Transport::connect`/`close` need
/// exclusively).
#[derive(Clone)]
pub struct StdinHandle {
    inner: Arc<Mutex<ChildStdin>>,
    mode: StdinMode,
}

impl StdinHandle {
    pub async fn write_line(&self, line: &[u8]) -> Result<(), AgentError> {
        if self.mode == StdinMode::OneShot {
            return Ok(());
        }
        let mut guard = self.inner.lock().await;
        guard.write_all(line).await?;
        guard.write_all(b"\n").await?;
        guard.flush().await?;
        Ok(())
    }
}

pub struct Transport {
    state: LifecycleState,
    child: Arc<Mutex<Option<Child>>>,
    stdin: Option<StdinHandle>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    stderr_temp_file: Option<NamedTempFile>,
    stdin_mode: StdinMode,
    /// Set before `cancel` on a caller-initiated `close`, so
    /// `reader_task` can tell an expected shutdown apart from the
    /// child exiting on its own (§7 `AgentError::Process`).
    closing: Arc<AtomicBool>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Disconnected,
            child: Arc::new(Mutex::new(None)),
            stdin: None,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            stderr_temp_file: None,
            stdin_mode: StdinMode::OneShot,
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!(from = self.state.as_str(), to = next.as_str(), "transport state transition");
        self.state = next;
    }

    /// Spawn the child and start draining its pipes. Re-entrant calls
    /// on an already-connected transport are an error (§4.C).
    pub async fn connect(
        &mut self,
        spec: SpawnSpec,
        options: &AgentOptions,
        parser: Arc<EnvelopeParser>,
    ) -> Result<ConnectedChannels, AgentError> {
        if !matches!(self.state, LifecycleState::Disconnected) {
            return Err(AgentError::AlreadyConnected);
        }
        self.transition(LifecycleState::Connecting);
        self.cancel = CancellationToken::new();
        self.closing = Arc::new(AtomicBool::new(false));

        let mut command = Command::new(&spec.executable);
        command.args(&spec.argv);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        apply_env(&mut command, &spec.env);
        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = spawn_with_retry(&mut command, &spec.executable)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::connection("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::connection("child stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::connection("child stderr unavailable"))?;

        let (data_tx, data_rx) = mpsc::channel(DATA_CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(DATA_CHANNEL_CAPACITY);

        let stderr_temp_file = if options.stderr_callback.is_none() && options.stderr_writer.is_none() {
            Some(NamedTempFile::new().map_err(AgentError::Io)?)
        } else {
            None
        };
        let stderr_path = stderr_temp_file.as_ref().map(|f| f.path().to_path_buf());

        let shared_child = Arc::new(Mutex::new(Some(child)));
        self.child = shared_child.clone();

        let reader_handle = tokio::spawn(reader_task(
            stdout,
            parser,
            data_tx,
            err_tx,
            self.cancel.clone(),
            shared_child,
            self.closing.clone(),
            stderr_path.clone(),
        ));

        let stderr_handle = tokio::spawn(stderr_task(
            stderr,
            options.stderr_callback.clone(),
            options.stderr_writer.clone(),
            stderr_path,
            self.cancel.clone(),
        ));

        self.tasks = vec![reader_handle, stderr_handle];
        self.stdin = Some(StdinHandle {
            inner: Arc::new(Mutex::new(stdin)),
            mode: spec.stdin_mode,
        });
        self.stderr_temp_file = stderr_temp_file;
        self.stdin_mode = spec.stdin_mode;
        self.transition(LifecycleState::Connected);

        Ok(ConnectedChannels {
            envelopes: data_rx,
            errors: err_rx,
        })
    }

    /// Write one line to the child's stdin. A no-op in one-shot mode
    /// (§4.C: "the transport does not accept SendMessage after
    /// connect"), since the prompt there is already in argv.
    pub async fn send(&self, line: &[u8]) -> Result<(), AgentError> {
        let stdin = self
            .stdin
            .clone()
            .ok_or_else(|| AgentError::connection("transport is not connected"))?;
        stdin.write_line(line).await
    }

    /// Share the stdin path with the Control Protocol (§9 "Shared
    /// stdin writer"). `None` before `connect` or after `close`.
    pub fn stdin_handle(&self) -> Option<StdinHandle> {
        self.stdin.clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, LifecycleState::Connected)
    }

    /// Idempotent, safe from any state (§4.C). Runs the 5s+5s
    /// grace/SIGTERM/SIGKILL protocol.
    pub async fn close(&mut self) -> Result<(), AgentError> {
        if matches!(self.state, LifecycleState::Disconnected) {
            return Ok(());
        }
        self.transition(LifecycleState::Terminating);

        self.closing.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        self.stdin = None; // drop the writer, closing the child's stdin

        let taken = self.child.lock().await.take();
        if let Some(mut child) = taken {
            if time::timeout(GRACE_PERIOD, child.wait()).await.is_err() {
                send_sigterm(&child);
                if time::timeout(GRACE_PERIOD, child.wait()).await.is_err() {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.stderr_temp_file = None; // `NamedTempFile`'s drop removes the file

        self.transition(LifecycleState::Disconnected);
        Ok(())
    }
}

fn apply_env(command: &mut Command, env: &BTreeMap<String, String>) {
    for (key, value) in env {
        command.env(key, value);
    }
}

fn spawn_with_retry(command: &mut Command, executable: &std::path::Path) -> Result<Child, AgentError> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    std::thread::sleep(backoff);
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(AgentError::connection(format!(
                    "failed to spawn {}: {source}",
                    executable.display()
                )));
            }
        }
    }
    unreachable!("spawn_with_retry should return before exhausting retries")
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is the child's own pid, owned by `child`; sending
        // a signal to it is the documented use of `libc::kill`.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(windows)]
fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .status();
    }
}

async fn reader_task(
    mut stdout: tokio::process::ChildStdout,
    parser: Arc<EnvelopeParser>,
    data_tx: mpsc::Sender<Envelope>,
    err_tx: mpsc::Sender<AgentError>,
    cancel: CancellationToken,
    child: Arc<Mutex<Option<Child>>>,
    closing: Arc<AtomicBool>,
    stderr_path: Option<PathBuf>,
) {
    let mut buf = vec![0u8; STDOUT_CHUNK];
    let mut cancelled = false;
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            result = stdout.read(&mut buf) => result,
        };
        let n = match read {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        let results = parser
            .feed(&buf[..n])
            .expect("EnvelopeParser::feed never returns an outer Err");

        for result in results {
            match result {
                // Forwards every envelope, data and control alike; the
                // Router is what enforces the result-sentinel law and
                // decides when a logical response ends.
                Ok(envelope) => {
                    if data_tx.send(envelope).await.is_err() {
                        return;
                    }
                }
                Err(parse_err) => {
                    if err_tx.send(parse_err).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    // Stdout closed (or a read error) rather than a caller-initiated
    // `close`. Reap the child and, if it exited non-zero, surface
    // §7's `AgentError::Process` carrying whatever stderr was captured.
    if cancelled || closing.load(Ordering::SeqCst) {
        return;
    }
    let taken = child.lock().await.take();
    if let Some(mut child) = taken {
        if let Ok(status) = child.wait().await {
            if !status.success() {
                let stderr = stderr_path
                    .as_deref()
                    .and_then(|path| std::fs::read_to_string(path).ok())
                    .unwrap_or_default();
                let _ = err_tx
                    .send(AgentError::Process {
                        exit_code: status.code(),
                        stderr,
                    })
                    .await;
            }
        }
    }
}

async fn stderr_task(
    stderr: tokio::process::ChildStderr,
    callback: Option<StderrCallback>,
    writer: Option<Arc<std::sync::Mutex<dyn io::Write + Send>>>,
    temp_file_path: Option<PathBuf>,
    cancel: CancellationToken,
) {
    let mut temp_file = temp_file_path
        .as_deref()
        .and_then(|path| std::fs::OpenOptions::new().append(true).open(path).ok());

    let mut lines = BufReader::new(stderr).lines();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match next {
            Ok(Some(line)) => line,
            _ => break,
        };

        if let Some(callback) = &callback {
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            // Recover from a panicking stderr callback (§9 "Callback
            // panic safety") so one bad line doesn't kill drainage.
            let callback = callback.clone();
            let owned = trimmed.to_string();
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (callback)(&owned)));
        } else if let Some(writer) = &writer {
            if let Ok(mut guard) = writer.lock() {
                let _ = writeln!(guard, "{line}");
            }
        } else if let Some(file) = &mut temp_file {
            let _ = writeln!(file, "{line}");
        }
    }
}
