//! Caller-facing dispatch trait for decoded stream frames.

use crate::messages::{HeartbeatData, TaskCompletedData, TaskFailedData, TaskStatusData};

/// Why a subscription gave up without the task reaching a terminal state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FatalError {
    /// Too many consecutive connection failures.
    #[error("reconnect budget exhausted after {attempts} consecutive failures")]
    BudgetExhausted { attempts: u32 },

    /// The server reported an error it marked as not retryable.
    #[error("server error: {message}")]
    Server { message: String },
}

/// Receives decoded frames from one subscription.
///
/// Methods run on the subscription's driver task, one at a time, in frame
/// order. Every method has a no-op default, so implementations only name
/// the frames they care about. A handler may stop its own subscription
/// from inside any method by cancelling the token it was spawned with.
pub trait WatchHandler: Send + 'static {
    /// Channel liveness signal. Carries no task state.
    fn on_heartbeat(&mut self, _heartbeat: HeartbeatData) {}

    /// Non-terminal task state change.
    fn on_status(&mut self, _status: TaskStatusData) {}

    /// Terminal success. Called at most once over the life of the
    /// subscription, reconnects included.
    fn on_completed(&mut self, _completed: TaskCompletedData) {}

    /// Terminal failure. Called at most once over the life of the
    /// subscription, reconnects included.
    fn on_failed(&mut self, _failed: TaskFailedData) {}

    /// The subscription is giving up without a terminal frame. Called at
    /// most once, and never after a terminal frame was delivered.
    fn on_fatal(&mut self, _fatal: FatalError) {}

    /// A frame type this client does not recognize. The default logs it
    /// at debug level and moves on.
    fn on_unrecognized(&mut self, kind: &str, _data: &serde_json::Value) {
        tracing::debug!(kind, "Ignoring unrecognized stream message type");
    }
}
