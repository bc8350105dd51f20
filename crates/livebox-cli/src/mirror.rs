//! Mirrors on-disk edits of the editable file into the sandbox.
//!
//! The file is polled on an interval. Nothing is read until the sandbox has
//! booted, so changes made while it boots are picked up by the first poll
//! afterwards instead of being dropped.

use livebox_core::{EditableDocument, FileSyncChannel, PushOutcome};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Watches one file on disk and pushes its full contents on change.
pub struct EditMirror {
    source: PathBuf,
    channel: FileSyncChannel,
    document: EditableDocument,
    interval: Duration,
}

impl EditMirror {
    /// `initial` is the text that was mounted with the project.
    pub fn new(
        source: impl Into<PathBuf>,
        channel: FileSyncChannel,
        initial: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            source: source.into(),
            document: EditableDocument::new(channel.clone(), initial),
            channel,
            interval,
        }
    }

    /// Check the file once, pushing it if it changed.
    pub async fn poll(&mut self) -> Option<PushOutcome> {
        if !self.channel.is_connected() {
            return None;
        }
        let text = match tokio::fs::read_to_string(&self.source).await {
            Ok(text) => text,
            Err(e) => {
                // Editors often replace files by rename; the next poll sees it.
                debug!(path = %self.source.display(), error = %e, "Editable file unreadable");
                return None;
            }
        };
        if text == self.document.text() {
            return None;
        }

        match self.document.replace(text) {
            Ok(outcome) => {
                debug!(path = %self.document.path(), ?outcome, "Edit pushed");
                Some(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Edit rejected");
                None
            }
        }
    }

    /// Poll until `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.poll().await;
                }
            }
        }
        debug!(path = %self.source.display(), "Edit mirror stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livebox_core::{FileContents, SandboxProvider, SandboxSlot};
    use livebox_host::{HostConfig, HostProvider};
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "livebox-cli-mirror-test-{}-{}",
            std::process::id(),
            id
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_poll_waits_for_sandbox_then_pushes_changes() {
        let dir = temp_dir();
        let source = dir.join("App.jsx");
        fs::write(&source, "v1").unwrap();

        let slot = SandboxSlot::default();
        let channel = FileSyncChannel::new("src/App.jsx", slot.clone()).unwrap();
        let mut mirror = EditMirror::new(&source, channel.clone(), "v1", Duration::from_millis(10));

        // Changed while booting: nothing is read yet.
        fs::write(&source, "v2").unwrap();
        assert_eq!(mirror.poll().await, None);

        let provider = HostProvider::new(HostConfig::default().with_root(dir.join("sandboxes")));
        let env = provider.boot().await.unwrap();
        assert!(slot.set(env.clone()).is_ok());

        assert_eq!(mirror.poll().await, Some(PushOutcome::Queued));
        assert_eq!(mirror.poll().await, None);
        channel.flush().await;
        assert_eq!(
            env.read_file("src/App.jsx").await.unwrap(),
            FileContents::Text("v2".into())
        );

        drop(env);
        fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = temp_dir();
        let source = dir.join("App.jsx");
        fs::write(&source, "v1").unwrap();

        let slot = SandboxSlot::default();
        let channel = FileSyncChannel::new("App.jsx", slot.clone()).unwrap();
        let provider = HostProvider::new(HostConfig::default().with_root(dir.join("sandboxes")));
        let env = provider.boot().await.unwrap();
        assert!(slot.set(env.clone()).is_ok());

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let mirror = EditMirror::new(&source, channel.clone(), "v1", Duration::from_millis(10));
        let task = tokio::spawn(mirror.run(async {
            let _ = stop_rx.await;
        }));

        fs::write(&source, "v2").unwrap();
        let mut mirrored = false;
        for _ in 0..200 {
            channel.flush().await;
            if let Ok(FileContents::Text(text)) = env.read_file("App.jsx").await {
                if text == "v2" {
                    mirrored = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(mirrored, "edit should reach the sandbox");

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("mirror should stop")
            .unwrap();

        drop(env);
        fs::remove_dir_all(dir).ok();
    }
}
