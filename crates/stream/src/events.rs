//! Manager-level events for watch lifecycles.
//!
//! These describe watches coming and going, not individual frames; frame
//! payloads go to each watch's own [`WatchHandler`]. They are produced by
//! [`WatchManager`] and broadcast via a [`tokio::sync::broadcast`] channel.
//!
//! [`WatchHandler`]: crate::handler::WatchHandler
//! [`WatchManager`]: crate::manager::WatchManager

use crate::subscription::{SubscriptionState, WatchOutcome};

/// A lifecycle event for one managed watch.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A watch task was spawned under `key`.
    Started { key: String },

    /// The watch under `key` moved to a new lifecycle state
    /// (connecting, open, reconnecting, terminal).
    StateChanged {
        key: String,
        state: SubscriptionState,
    },

    /// The watch under `key` ended, replaced or not, with this outcome.
    Closed { key: String, outcome: WatchOutcome },
}
