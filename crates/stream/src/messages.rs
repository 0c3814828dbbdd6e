//! Typed definitions for the proxy's status-stream frames.
//!
//! Every frame on the wire is a JSON envelope `{"type": ..., "data": ...,
//! "timestamp": ...}`. The `type` discriminant selects one of the payload
//! structs below. Types this module does not know about decode into
//! [`StreamMessage::Unknown`] so that newer servers can introduce frame
//! types without breaking older clients.

use llmproxy_core::types::{EpochMillis, Rating, TaskState};
use serde::{Deserialize, Deserializer};

/// Wire discriminant for heartbeat frames.
pub const KIND_HEARTBEAT: &str = "heartbeat";
/// Wire discriminant for task state-change frames.
pub const KIND_TASK_STATUS: &str = "task_status";
/// Wire discriminant for successful-completion frames.
pub const KIND_TASK_COMPLETED: &str = "task_completed";
/// Wire discriminant for failure frames.
pub const KIND_TASK_FAILED: &str = "task_failed";
/// Wire discriminant for server-reported error frames.
pub const KIND_ERROR: &str = "error";

/// Liveness signal. Carries no state; receiving one only proves the
/// channel is alive.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatData {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default, deserialize_with = "opt_epoch_millis")]
    pub timestamp: Option<EpochMillis>,
}

/// Non-terminal task state change.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusData {
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: TaskState,
    #[serde(default, deserialize_with = "opt_epoch_millis")]
    pub created_at: Option<EpochMillis>,
    #[serde(default, deserialize_with = "opt_epoch_millis")]
    pub updated_at: Option<EpochMillis>,
    #[serde(default, deserialize_with = "opt_epoch_millis")]
    pub processing_started_at: Option<EpochMillis>,
}

/// Terminal frame: the task finished and `result` holds its output.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletedData {
    pub task_id: String,
    pub result: String,
    #[serde(default)]
    pub status: Option<TaskState>,
    #[serde(default)]
    pub rating: Option<Rating>,
    #[serde(default, deserialize_with = "opt_epoch_millis")]
    pub created_at: Option<EpochMillis>,
    #[serde(default, deserialize_with = "opt_epoch_millis")]
    pub completed_at: Option<EpochMillis>,
}

/// Terminal frame: the task failed and `error` says why.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailedData {
    pub task_id: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub status: Option<TaskState>,
    #[serde(default, deserialize_with = "opt_epoch_millis")]
    pub created_at: Option<EpochMillis>,
    #[serde(default, deserialize_with = "opt_epoch_millis")]
    pub completed_at: Option<EpochMillis>,
}

/// Server-reported delivery problem.
///
/// `should_reconnect` distinguishes transient conditions (poll timeout,
/// storage hiccup) from fatal ones. When the server suggests a retry it
/// may also suggest how long to wait first.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub error: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub should_reconnect: Option<bool>,
    /// Suggested delay before the next attempt, in milliseconds.
    #[serde(default)]
    pub reconnect_delay: Option<u64>,
}

impl ErrorData {
    /// Whether the server marked this error as retryable. Absent means no.
    pub fn is_transient(&self) -> bool {
        self.should_reconnect.unwrap_or(false)
    }
}

/// One decoded frame from the status stream.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Heartbeat(HeartbeatData),
    TaskStatus(TaskStatusData),
    TaskCompleted(TaskCompletedData),
    TaskFailed(TaskFailedData),
    Error(ErrorData),
    /// A frame type this client does not know. Kept raw so callers can
    /// inspect it if they care.
    Unknown {
        kind: String,
        data: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parse one frame body into a typed [`StreamMessage`].
///
/// Fails only when the envelope itself is malformed or a known frame type
/// carries a payload that does not match its schema. Unknown frame types
/// succeed as [`StreamMessage::Unknown`].
pub fn parse_message(text: &str) -> Result<StreamMessage, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;

    // Heartbeats in particular may arrive with no data member at all.
    let data = match envelope.data {
        serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
        other => other,
    };

    let message = match envelope.kind.as_str() {
        KIND_HEARTBEAT => StreamMessage::Heartbeat(serde_json::from_value(data)?),
        KIND_TASK_STATUS => StreamMessage::TaskStatus(serde_json::from_value(data)?),
        KIND_TASK_COMPLETED => StreamMessage::TaskCompleted(serde_json::from_value(data)?),
        KIND_TASK_FAILED => StreamMessage::TaskFailed(serde_json::from_value(data)?),
        KIND_ERROR => StreamMessage::Error(serde_json::from_value(data)?),
        _ => StreamMessage::Unknown {
            kind: envelope.kind,
            data,
        },
    };

    Ok(message)
}

/// Accept a timestamp as either epoch milliseconds or an RFC 3339 string.
///
/// Current servers emit epoch milliseconds; servers predating the wire
/// cleanup emitted RFC 3339. Both normalize to [`EpochMillis`].
fn opt_epoch_millis<'de, D>(deserializer: D) -> Result<Option<EpochMillis>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Rfc3339(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Millis(ms)) => Ok(Some(ms)),
        Some(Raw::Rfc3339(text)) => chrono::DateTime::parse_from_rfc3339(&text)
            .map(|dt| Some(dt.timestamp_millis()))
            .map_err(serde::de::Error::custom),
    }
}
