//! Process handles and their output streams.
//!
//! A backend creates a linked pair with [`ProcessHandle::channel`]: it keeps
//! the [`ProcessIo`] side to emit output and report the exit code, and hands
//! the [`ProcessHandle`] to the caller.
//!
//! Output travels over an unbounded channel, so the producer never blocks and
//! nothing is dropped. [`ProcessIo::finish`] closes the output side before
//! publishing the exit code, which means a consumer that drains the stream
//! first always sees every chunk before the exit status.

use crate::error::{CoreError, Result};
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Unique identifier for a spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(Uuid);

impl ProcessId {
    /// Create a new random process ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Program plus argument vector. Interpreted by the sandbox only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// One opaque piece of process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Text(String),
    Binary(Bytes),
}

impl OutputChunk {
    /// Text view of the chunk, lossy for binary output.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(s) => Cow::Borrowed(s),
            Self::Binary(b) => String::from_utf8_lossy(b),
        }
    }
}

impl OutputChunk {
    /// Classify raw bytes read from a pipe: valid UTF-8 becomes `Text`.
    pub fn from_raw(raw: Vec<u8>) -> Self {
        match String::from_utf8(raw) {
            Ok(text) => Self::Text(text),
            Err(e) => Self::Binary(Bytes::from(e.into_bytes())),
        }
    }
}

impl From<&str> for OutputChunk {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for OutputChunk {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Consumer of process output, called once per chunk in arrival order.
pub trait OutputSink: Send + Sync {
    fn write(&self, chunk: &OutputChunk);
}

impl<F> OutputSink for F
where
    F: Fn(&OutputChunk) + Send + Sync,
{
    fn write(&self, chunk: &OutputChunk) {
        self(chunk)
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardOutput;

impl OutputSink for DiscardOutput {
    fn write(&self, _chunk: &OutputChunk) {}
}

/// Exit outcome of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    code: i32,
}

impl ExitStatus {
    pub fn new(code: i32) -> Self {
        Self { code }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    /// Check if the process succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Lazy, order-preserving stream of a process's output.
///
/// Ends once the process has finished emitting output.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::UnboundedReceiver<OutputChunk>,
}

impl OutputStream {
    /// Receive the next chunk, or `None` once output is complete.
    pub async fn next_chunk(&mut self) -> Option<OutputChunk> {
        self.rx.recv().await
    }
}

impl Stream for OutputStream {
    type Item = OutputChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[derive(Debug)]
struct KillState {
    requested: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// Requests termination of a process. Cheap to clone.
#[derive(Debug, Clone)]
pub struct KillSwitch {
    inner: Arc<KillState>,
}

impl KillSwitch {
    /// Ask the backend to terminate the process.
    ///
    /// Returns `true` only for the call that delivered the request.
    pub fn kill(&self) -> bool {
        self.inner.requested.store(true, Ordering::SeqCst);
        let tx = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Whether termination was requested through this switch.
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }
}

/// Caller side of a spawned process.
///
/// There is no restart; spawn again for a fresh process.
#[derive(Debug)]
pub struct ProcessHandle {
    id: ProcessId,
    command: CommandSpec,
    output: OutputStream,
    exit: oneshot::Receiver<i32>,
    kill: KillSwitch,
}

impl ProcessHandle {
    /// Create a linked handle/backend pair for `command`.
    pub fn channel(command: CommandSpec) -> (ProcessHandle, ProcessIo) {
        let id = ProcessId::new();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        let handle = ProcessHandle {
            id,
            command,
            output: OutputStream { rx: out_rx },
            exit: exit_rx,
            kill: KillSwitch {
                inner: Arc::new(KillState {
                    requested: AtomicBool::new(false),
                    tx: Mutex::new(Some(kill_tx)),
                }),
            },
        };
        let io = ProcessIo {
            id,
            output: OutputSender { tx: out_tx },
            exit: exit_tx,
            kill: kill_rx,
        };
        (handle, io)
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    pub fn kill_switch(&self) -> KillSwitch {
        self.kill.clone()
    }

    /// Direct access to the output stream for stream-style consumers.
    ///
    /// Chunks taken here are not seen by a later [`pipe_to`](Self::pipe_to).
    pub fn output(&mut self) -> &mut OutputStream {
        &mut self.output
    }

    /// Deliver all remaining output to `sink`, then resolve the exit status.
    ///
    /// The sink sees chunks exactly once and in emission order; the exit
    /// status is only returned after the last chunk was written.
    pub async fn pipe_to(mut self, sink: &dyn OutputSink) -> Result<ExitStatus> {
        let mut chunks = 0u64;
        while let Some(chunk) = self.output.rx.recv().await {
            tracing::trace!(process_id = %self.id, chunk = %chunk.to_text(), "Process output");
            sink.write(&chunk);
            chunks += 1;
        }
        match self.exit.await {
            Ok(code) => {
                tracing::debug!(
                    process_id = %self.id,
                    command = %self.command,
                    exit_code = code,
                    chunks,
                    "Process exited"
                );
                Ok(ExitStatus::new(code))
            }
            Err(_) => {
                tracing::warn!(process_id = %self.id, command = %self.command, "Process lost");
                Err(CoreError::ProcessLost(self.id))
            }
        }
    }

    /// Wait for exit, discarding remaining output.
    pub async fn wait(self) -> Result<ExitStatus> {
        self.pipe_to(&DiscardOutput).await
    }
}

/// Clonable output producer handed to backend reader tasks.
#[derive(Debug, Clone)]
pub struct OutputSender {
    tx: mpsc::UnboundedSender<OutputChunk>,
}

impl OutputSender {
    /// Queue a chunk. Returns `false` if the handle is gone.
    pub fn send(&self, chunk: impl Into<OutputChunk>) -> bool {
        self.tx.send(chunk.into()).is_ok()
    }
}

/// Backend side of a spawned process.
#[derive(Debug)]
pub struct ProcessIo {
    id: ProcessId,
    output: OutputSender,
    exit: oneshot::Sender<i32>,
    kill: oneshot::Receiver<()>,
}

impl ProcessIo {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Another producer for the same output stream.
    pub fn sender(&self) -> OutputSender {
        self.output.clone()
    }

    /// Queue a chunk. Returns `false` if the handle is gone.
    pub fn emit(&self, chunk: impl Into<OutputChunk>) -> bool {
        self.output.send(chunk)
    }

    /// Resolves when the caller requested termination.
    ///
    /// Never resolves if every kill switch was dropped without killing.
    pub async fn kill_requested(&mut self) {
        if (&mut self.kill).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Close the output stream, then publish the exit code.
    ///
    /// Senders obtained through [`sender`](Self::sender) must be dropped
    /// first, otherwise the consumer keeps waiting for output.
    pub fn finish(self, code: i32) {
        let ProcessIo { output, exit, .. } = self;
        drop(output);
        let _ = exit.send(code);
    }
}
