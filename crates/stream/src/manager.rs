//! Multi-watch subscription manager.
//!
//! [`WatchManager`] owns several concurrent task watches, keyed by a
//! caller-chosen string (usually the task id, or a purpose like
//! `"demo"`). It spawns a driver task per watch, stops a previous watch
//! when its key is reused, and cancels everything on shutdown.
//!
//! Watch lifecycle events are broadcast via a [`tokio::sync::broadcast`]
//! channel. Call [`WatchManager::subscribe`] to receive them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::events::WatchEvent;
use crate::handler::WatchHandler;
use crate::policy::WatchPolicy;
use crate::subscription::{Subscription, SubscriptionHandle, WatchOutcome};
use crate::transport::{Connector, SseConnector, WatchRequest};

/// Broadcast channel capacity for watch lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for each watch task to exit cleanly.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Manages concurrent status-stream watches against one proxy.
///
/// Created once and cheaply cloned around behind an `Arc`.
pub struct WatchManager {
    /// Active watch tasks indexed by caller-chosen key. Shared with the
    /// relay tasks, which reap their own entry once the watch ends.
    watches: Arc<RwLock<HashMap<String, ManagedWatch>>>,
    connector: Arc<dyn Connector>,
    event_tx: broadcast::Sender<WatchEvent>,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
    /// Distinguishes a watch from a later one reusing its key, so a
    /// finished relay never reaps its replacement.
    next_watch_id: AtomicU64,
}

/// Internal bookkeeping for a single watch.
struct ManagedWatch {
    id: u64,
    /// Per-watch cancellation token (child of the master token).
    cancel: CancellationToken,
    /// The task that relays state changes and the final outcome to the
    /// broadcast channel; it outlives the driver by one join.
    relay_handle: tokio::task::JoinHandle<()>,
}

impl WatchManager {
    /// Build a manager over an arbitrary transport.
    pub fn new(connector: Arc<dyn Connector>) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Arc::new(Self {
            watches: Arc::new(RwLock::new(HashMap::new())),
            connector,
            event_tx,
            cancel: CancellationToken::new(),
            next_watch_id: AtomicU64::new(0),
        })
    }

    /// Build a manager over the production SSE transport.
    pub fn with_sse() -> Arc<Self> {
        Self::new(Arc::new(SseConnector::new()))
    }

    /// Subscribe to watch lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.event_tx.subscribe()
    }

    /// Keys of all watches still running.
    ///
    /// A watch that reaches its outcome is removed by its relay task
    /// just before the `Closed` event is broadcast, so it never shows
    /// up here as active.
    pub async fn active_keys(&self) -> Vec<String> {
        self.watches.read().await.keys().cloned().collect()
    }

    /// Start watching a task's status stream under `key`.
    ///
    /// If a watch already runs under this key it is stopped first; its
    /// `Closed` event still fires with whatever outcome it reached.
    pub async fn watch<H>(
        &self,
        key: impl Into<String>,
        request: WatchRequest,
        policy: WatchPolicy,
        handler: H,
    ) where
        H: WatchHandler,
    {
        let key = key.into();
        let id = self.next_watch_id.fetch_add(1, Ordering::Relaxed);
        let watch_cancel = self.cancel.child_token();

        // Hold the map lock across spawn and insert: the relay reaps its
        // own entry when the watch ends, and must not find the map before
        // the entry exists.
        let mut watches = self.watches.write().await;

        let handle = Subscription::spawn(
            Arc::clone(&self.connector),
            request,
            policy,
            handler,
            watch_cancel.clone(),
        );

        let relay_handle = tokio::spawn(relay_events(
            key.clone(),
            id,
            handle,
            self.event_tx.clone(),
            Arc::clone(&self.watches),
        ));

        let managed = ManagedWatch {
            id,
            cancel: watch_cancel,
            relay_handle,
        };

        let previous = watches.insert(key.clone(), managed);
        drop(watches);

        if let Some(previous) = previous {
            tracing::info!(key = %key, "Superseding existing watch");
            previous.cancel.cancel();
        }

        let _ = self.event_tx.send(WatchEvent::Started { key });
    }

    /// Stop the watch under `key`. Returns whether one was running.
    pub async fn stop(&self, key: &str) -> bool {
        match self.watches.write().await.remove(key) {
            Some(managed) => {
                tracing::info!(key, "Stopping watch");
                managed.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Gracefully shut down all watch tasks.
    ///
    /// Cancels the master token, then waits up to 5 seconds per task
    /// for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down watch manager");
        self.cancel.cancel();

        // Drain under the lock, but release it before joining: the relay
        // tasks reap through the same lock on their way out.
        let drained: Vec<(String, ManagedWatch)> =
            self.watches.write().await.drain().collect();

        for (key, managed) in drained {
            tracing::debug!(key = %key, "Waiting for watch task");
            managed.cancel.cancel();
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, managed.relay_handle).await;
        }

        tracing::info!("Watch manager shut down complete");
    }
}

/// Forward one watch's state changes to the broadcast channel, then its
/// final outcome once the driver exits, then reap the watch's map entry.
async fn relay_events(
    key: String,
    id: u64,
    handle: SubscriptionHandle,
    event_tx: broadcast::Sender<WatchEvent>,
    watches: Arc<RwLock<HashMap<String, ManagedWatch>>>,
) {
    let mut states = handle.state_changes();

    // `changed` errs once the driver drops its state sender, which is
    // exactly when the outcome becomes available.
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        let _ = event_tx.send(WatchEvent::StateChanged {
            key: key.clone(),
            state,
        });
    }

    let outcome = match handle.join().await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(key = %key, error = %e, "Watch driver task panicked");
            WatchOutcome::Stopped
        }
    };

    // Reap before broadcasting `Closed`, so observers of that event see
    // the key gone from `active_keys`. The id check keeps a superseded
    // watch's relay from removing its replacement.
    {
        let mut watches = watches.write().await;
        if watches.get(&key).is_some_and(|managed| managed.id == id) {
            watches.remove(&key);
        }
    }

    let _ = event_tx.send(WatchEvent::Closed { key, outcome });
}
