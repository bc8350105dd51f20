//! Live propagation of editor changes into the sandbox.
//!
//! Pushes are fire-and-forget. Writes to the editable path go through a
//! single writer task, so they land in call order (last call wins) no matter
//! how the backend schedules concurrent writes. Nothing here touches process
//! lifecycle; hot reload is the sandbox's business.

use crate::error::{CoreError, SyncError};
use crate::sandbox::SandboxEnvironment;
use crate::tree::{normalize_path, FileContents};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot, OnceCell};

/// Slot the orchestrator fills once the sandbox has booted.
pub type SandboxSlot = Arc<OnceCell<Arc<dyn SandboxEnvironment>>>;

/// What happened to a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued for the sandbox.
    Queued,
    /// The sandbox did not exist yet; the edit was dropped.
    Dropped,
}

enum SyncOp {
    Write(FileContents),
    Flush(oneshot::Sender<()>),
}

struct SyncInner {
    editable: String,
    sandbox: SandboxSlot,
    writer: Mutex<Option<mpsc::UnboundedSender<SyncOp>>>,
    errors_tx: mpsc::UnboundedSender<SyncError>,
    errors_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncError>>>,
}

/// Forwards edits of the designated editable path into the sandbox.
#[derive(Clone)]
pub struct FileSyncChannel {
    inner: Arc<SyncInner>,
}

impl FileSyncChannel {
    /// Create a channel for `editable_path`, connected through `sandbox`.
    pub fn new(editable_path: &str, sandbox: SandboxSlot) -> Result<Self, CoreError> {
        let editable = normalize_path(editable_path)?;
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        Ok(Self {
            inner: Arc::new(SyncInner {
                editable,
                sandbox,
                writer: Mutex::new(None),
                errors_tx,
                errors_rx: Mutex::new(Some(errors_rx)),
            }),
        })
    }

    /// Normalized editable path (no leading slash).
    pub fn editable_path(&self) -> &str {
        &self.inner.editable
    }

    /// Whether the sandbox exists yet.
    pub fn is_connected(&self) -> bool {
        self.inner.sandbox.initialized()
    }

    /// Push new contents for `path`.
    ///
    /// Before the sandbox exists the edit is dropped and `Dropped` returned.
    /// Write failures are reported on [`take_errors`](Self::take_errors).
    /// Must be called from within a tokio runtime.
    pub fn push(
        &self,
        path: &str,
        contents: impl Into<FileContents>,
    ) -> Result<PushOutcome, SyncError> {
        let editable = &self.inner.editable;
        if normalize_path(path).ok().as_ref() != Some(editable) {
            return Err(SyncError::NotEditable {
                path: path.to_string(),
                editable: editable.clone(),
            });
        }

        let Some(env) = self.inner.sandbox.get() else {
            tracing::debug!(path = %editable, "Sandbox not booted, dropping edit");
            return Ok(PushOutcome::Dropped);
        };

        let contents = contents.into();
        tracing::trace!(path = %editable, len = contents.len(), "Queueing edit");
        let mut writer = self
            .inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = writer.get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_writer(
                Arc::clone(env),
                editable.clone(),
                rx,
                self.inner.errors_tx.clone(),
            ));
            tx
        });
        if tx.send(SyncOp::Write(contents)).is_err() {
            return Err(SyncError::Write {
                path: editable.clone(),
                message: "sync writer stopped".into(),
            });
        }
        Ok(PushOutcome::Queued)
    }

    /// Wait until every edit queued so far has been applied or failed.
    pub async fn flush(&self) {
        let tx = self
            .inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(tx) = tx else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(SyncOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Take the receiver of per-edit failures. Only the first call gets it.
    pub fn take_errors(&self) -> Option<mpsc::UnboundedReceiver<SyncError>> {
        self.inner
            .errors_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

async fn run_writer(
    env: Arc<dyn SandboxEnvironment>,
    path: String,
    mut ops: mpsc::UnboundedReceiver<SyncOp>,
    errors: mpsc::UnboundedSender<SyncError>,
) {
    while let Some(op) = ops.recv().await {
        match op {
            SyncOp::Write(contents) => match env.write_file(&path, &contents).await {
                Ok(()) => tracing::debug!(path = %path, len = contents.len(), "Edit synced"),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Edit sync failed");
                    let _ = errors.send(SyncError::Write {
                        path: path.clone(),
                        message: e.to_string(),
                    });
                }
            },
            SyncOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// The single text buffer the user edits. Every change is pushed in full.
pub struct EditableDocument {
    text: String,
    channel: FileSyncChannel,
}

impl EditableDocument {
    pub fn new(channel: FileSyncChannel, initial: impl Into<String>) -> Self {
        Self {
            text: initial.into(),
            channel,
        }
    }

    pub fn path(&self) -> &str {
        self.channel.editable_path()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the buffer and push it into the sandbox.
    pub fn replace(&mut self, text: impl Into<String>) -> Result<PushOutcome, SyncError> {
        self.text = text.into();
        let path = self.channel.editable_path().to_string();
        self.channel.push(&path, self.text.clone())
    }
}
