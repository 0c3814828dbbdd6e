//! Shared task-queue domain types.
//!
//! These mirror the JSON shapes the proxy emits on both the REST and the
//! streaming surfaces, so the other workspace crates can share one set of
//! definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task identifiers are server-assigned UUID strings.
pub type TaskId = String;

/// Wire timestamps on the streaming surface are integer milliseconds since
/// the Unix epoch.
pub type EpochMillis = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Convert an epoch-milliseconds wire value into a [`Timestamp`].
///
/// Returns `None` for values outside the range chrono can represent.
pub fn from_epoch_millis(ms: EpochMillis) -> Option<Timestamp> {
    chrono::DateTime::from_timestamp_millis(ms)
}

// ---------------------------------------------------------------------------
// Task lifecycle
// ---------------------------------------------------------------------------

/// Queue states a task moves through on the proxy.
///
/// `Completed` and `Failed` are terminal; the server never transitions a
/// task out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    /// Whether the server will emit further state changes for this task.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// The wire string for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's verdict on a completed task's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Upvote,
    Downvote,
}

impl Rating {
    pub fn as_str(self) -> &'static str {
        match self {
            Rating::Upvote => "upvote",
            Rating::Downvote => "downvote",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task record
// ---------------------------------------------------------------------------

/// A queued generation task as returned by the task-listing endpoints.
///
/// Timestamps here are epoch milliseconds, matching the proxy's storage
/// format. `ollama_params` stays a raw JSON string on this surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub user_id: String,
    pub product_data: String,
    pub status: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: EpochMillis,
    pub updated_at: EpochMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<EpochMillis>,
    pub priority: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<EpochMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<EpochMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<EpochMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama_params: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<EpochMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration: Option<EpochMillis>,
    /// The proxy serializes the user rating under the short key `rating`.
    #[serde(
        rename = "rating",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub user_rating: Option<Rating>,
}

// ---------------------------------------------------------------------------
// Model parameters
// ---------------------------------------------------------------------------

/// Inference parameter overrides forwarded to the model backend.
///
/// Every field is optional; the proxy fills in backend defaults for any
/// field left unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OllamaParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}
