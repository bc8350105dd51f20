//! Server readiness: the sandbox announces "reachable at address", the bridge
//! keeps the latest address live for a preview surface.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Capacity of the sandbox-level readiness channel.
const READY_CHANNEL_CAPACITY: usize = 16;

/// Address a server inside the sandbox became reachable at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    /// Logical port the server bound inside the sandbox.
    pub port: u16,
    /// URL a preview surface should load.
    pub url: String,
}

impl ServerAddress {
    pub fn new(port: u16, url: impl Into<String>) -> Self {
        Self {
            port,
            url: url.into(),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (port {})", self.url, self.port)
    }
}

/// Emitter side of the readiness event, owned by a sandbox backend.
///
/// The event is keyed to the sandbox, not to any process.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    tx: broadcast::Sender<ServerAddress>,
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(READY_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Announce a reachable server. Returns the number of listeners reached.
    pub fn emit(&self, address: ServerAddress) -> usize {
        tracing::debug!(port = address.port, url = %address.url, "Server ready");
        self.tx.send(address).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerAddress> {
        self.tx.subscribe()
    }
}

/// Callback invoked with each new live address.
pub type ReadyCallback = Arc<dyn Fn(&ServerAddress) + Send + Sync>;

/// Single-slot readiness subscription plus the live address observable.
///
/// Attaching replaces the previous subscription, so repeated server starts
/// never accumulate listeners. Every event overwrites the live address.
pub struct ReadinessBridge {
    address: Arc<watch::Sender<Option<ServerAddress>>>,
    /// Bumped on every attach; only the newest subscription may publish.
    generation: Arc<AtomicU64>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ReadinessBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessBridge {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            address: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            subscription: Mutex::new(None),
        }
    }

    /// Listen on `events`, replacing any earlier subscription.
    ///
    /// The live address is cleared until the new subscription sees an event.
    /// Must be called from within a tokio runtime.
    pub fn attach(&self, mut events: broadcast::Receiver<ServerAddress>, on_ready: ReadyCallback) {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = subscription.take() {
            tracing::debug!("Replacing readiness subscription");
            previous.abort();
        }

        // An aborted task may still be mid-iteration; the generation check
        // inside the watch lock keeps it from publishing after the clear.
        let mine = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.address.send_replace(None);

        let address = Arc::clone(&self.address);
        let generation = Arc::clone(&self.generation);
        *subscription = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(addr) => {
                        let published = address.send_if_modified(|current| {
                            if generation.load(Ordering::SeqCst) != mine {
                                return false;
                            }
                            *current = Some(addr.clone());
                            true
                        });
                        if !published {
                            tracing::debug!(url = %addr.url, "Ignoring event from replaced subscription");
                            break;
                        }
                        tracing::info!(port = addr.port, url = %addr.url, "Preview address live");
                        on_ready(&addr);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Readiness listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Readiness channel closed");
                        break;
                    }
                }
            }
        }));
    }

    /// Drop the current subscription, if any. The last address stays visible.
    pub fn detach(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let current = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = current {
            task.abort();
        }
    }

    /// The currently live address.
    pub fn address(&self) -> Option<ServerAddress> {
        self.address.borrow().clone()
    }

    /// Observe live address changes.
    pub fn watch(&self) -> watch::Receiver<Option<ServerAddress>> {
        self.address.subscribe()
    }
}

impl Drop for ReadinessBridge {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback() -> (ReadyCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (
            Arc::new(move |_: &ServerAddress| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    async fn wait_for_url(bridge: &ReadinessBridge, url: &str) {
        let mut rx = bridge.watch();
        rx.wait_for(|a| a.as_ref().map(|a| a.url.as_str()) == Some(url))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_event_overwrites_address() {
        let signal = ReadySignal::new();
        let bridge = ReadinessBridge::new();
        let (cb, count) = counting_callback();
        bridge.attach(signal.subscribe(), cb);

        signal.emit(ServerAddress::new(3000, "http://a"));
        signal.emit(ServerAddress::new(3000, "http://b"));
        wait_for_url(&bridge, "http://b").await;

        assert_eq!(bridge.address().unwrap().url, "http://b");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reattach_replaces_subscription() {
        let signal = ReadySignal::new();
        let bridge = ReadinessBridge::new();
        let (first, first_count) = counting_callback();
        let (second, second_count) = counting_callback();

        bridge.attach(signal.subscribe(), first);
        bridge.attach(signal.subscribe(), second);
        tokio::task::yield_now().await;

        signal.emit(ServerAddress::new(5173, "http://x.local"));
        wait_for_url(&bridge, "http://x.local").await;

        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replaced_subscription_never_publishes_after_attach() {
        let stale = ReadySignal::new();
        let fresh = ReadySignal::new();
        let bridge = ReadinessBridge::new();
        let (first, _) = counting_callback();
        let (second, second_count) = counting_callback();
        bridge.attach(stale.subscribe(), first);

        let emitter = {
            let stale = stale.clone();
            tokio::spawn(async move {
                for i in 0..500u16 {
                    stale.emit(ServerAddress::new(3000 + i, "http://stale"));
                    tokio::task::yield_now().await;
                }
            })
        };
        tokio::task::yield_now().await;
        bridge.attach(fresh.subscribe(), second);
        emitter.await.unwrap();

        assert!(bridge.address().is_none());
        assert_eq!(second_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_event_means_no_address() {
        let signal = ReadySignal::new();
        let bridge = ReadinessBridge::new();
        let (cb, _) = counting_callback();
        bridge.attach(signal.subscribe(), cb);
        tokio::task::yield_now().await;
        assert!(bridge.address().is_none());
    }

    #[test]
    fn test_emit_without_listeners() {
        let signal = ReadySignal::new();
        assert_eq!(signal.emit(ServerAddress::new(80, "http://nobody")), 0);
    }
}
