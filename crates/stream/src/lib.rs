//! Resilient client for the proxy's task status stream.
//!
//! Provides typed frame parsing, a reconnecting per-task subscription
//! state machine, handler dispatch, reconnect policy, and a manager for
//! running several watches concurrently.

pub mod events;
pub mod handler;
pub mod manager;
pub mod messages;
pub mod policy;
pub mod subscription;
pub mod transport;

pub use handler::{FatalError, WatchHandler};
pub use manager::WatchManager;
pub use policy::WatchPolicy;
pub use subscription::{
    Subscription, SubscriptionHandle, SubscriptionState, WatchOutcome,
};
pub use transport::{Connector, SseConnector, WatchRequest};
