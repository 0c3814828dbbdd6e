//! Wire shapes for the proxy's REST responses and request bodies.
//!
//! Key casing is uneven on this surface: endpoints inherited from the
//! original TypeScript service use camelCase, the rest snake_case. The
//! structs below pin each field to its actual wire name rather than
//! normalizing, so captured server JSON decodes as-is.

use llmproxy_core::types::{EpochMillis, OllamaParams, Rating, Task, TaskState, Timestamp};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// `GET /` health probe.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub message: String,
    pub status: String,
}

/// `POST /api/create`. The returned `token` is the task-scoped result
/// token that authorizes both `POST /api/result` and the status stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResponse {
    pub success: bool,
    pub task_id: String,
    /// Human-readable wait estimate, preformatted by the server.
    pub estimated_time: String,
    pub token: String,
}

/// `POST /api/result`. Unlike the stream, this endpoint renders its
/// timestamps as RFC 3339 strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultResponse {
    pub success: bool,
    pub status: TaskState,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub processed_at: Option<Timestamp>,
    #[serde(default)]
    pub rating: Option<Rating>,
}

/// `GET /api/get` — the caller's latest task and rate-limit window.
#[derive(Debug, Clone, Deserialize)]
pub struct UserSnapshot {
    pub success: bool,
    pub user_id: String,
    pub rate_limit: RateLimitWindow,
    /// Latest task, denormalized by the server with `ollama_params`
    /// expanded inline; absent for users with no tasks yet.
    #[serde(default)]
    pub last_task: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitWindow {
    pub request_count: i64,
    pub request_limit: i64,
    pub window_start: EpochMillis,
    pub last_request: EpochMillis,
    pub period_start: Timestamp,
    pub period_end: Timestamp,
}

/// `POST /api/tasks/{id}/vote`. A null `rating` means the vote toggled
/// itself off.
#[derive(Debug, Clone, Deserialize)]
pub struct VoteResponse {
    pub success: bool,
    #[serde(default)]
    pub rating: Option<Rating>,
}

// ---------------------------------------------------------------------------
// Internal surface
// ---------------------------------------------------------------------------

/// Body of `POST /api/internal/generate-token`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateTokenRequest {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ollama_params: Option<OllamaParams>,
    /// Token lifetime in seconds; the server defaults to one hour.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub success: bool,
    pub token: String,
    pub expires_in: i64,
}

/// `GET /api/internal/all-tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskListResponse {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// `POST /api/internal/cleanup`.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupResponse {
    pub message: String,
    pub stats: CleanupStats,
    pub cleaned: CleanupCounts,
}

/// `GET /api/internal/cleanup/stats`.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupStatsResponse {
    pub success: bool,
    pub stats: CleanupStats,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStats {
    pub total_tasks: i64,
    pub pending_tasks: i64,
    pub processing_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    #[serde(rename = "tasksOlderThan7Days")]
    pub tasks_older_than_7_days: i64,
    pub timedout_tasks: i64,
    pub rate_limit_records: i64,
}

/// What one cleanup pass removed or recycled.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupCounts {
    /// Completed/failed tasks older than the retention window.
    pub tasks: i64,
    /// Processing tasks requeued after a heartbeat timeout.
    pub timedout: i64,
    /// Timed-out tasks failed for exceeding max retries.
    pub failed: i64,
    #[serde(rename = "rateLimits")]
    pub rate_limits: i64,
}

/// Body of `POST /api/internal/work-steal`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkStealRequest {
    pub processor_id: String,
    /// Server clamps to 1-5, default 2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steal_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkStealResponse {
    pub success: bool,
    #[serde(default)]
    pub stolen_tasks: Vec<Task>,
    pub stolen_count: i64,
}

/// `GET /api/internal/metrics`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorMetricsResponse {
    pub success: bool,
    #[serde(default)]
    pub processors: Vec<ProcessorLoad>,
}

/// Load snapshot for one processor in the fleet.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorLoad {
    pub processor_id: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub queue_size: i64,
    pub last_updated: EpochMillis,
    pub active_tasks: i64,
    pub avg_processing_time: f64,
}

/// `GET /api/internal/estimated-time` — expected queue wait for a new
/// task, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct EstimatedTimeResponse {
    pub success: bool,
    pub estimated_time: i64,
}

/// `GET /api/internal/rating-stats`.
#[derive(Debug, Clone, Deserialize)]
pub struct RatingStatsResponse {
    pub success: bool,
    pub total_rated: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    /// Present only for user-scoped queries.
    #[serde(default)]
    pub tasks: Option<Vec<Task>>,
}

/// `GET /api/internal/rating-analytics`.
#[derive(Debug, Clone, Deserialize)]
pub struct RatingAnalyticsResponse {
    pub success: bool,
    pub summary: RatingSummary,
    pub charts: RatingCharts,
    #[serde(default)]
    pub recent_ratings: Vec<Task>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatingSummary {
    pub upvotes: i64,
    pub downvotes: i64,
    pub total_rated: i64,
    /// `(upvotes - downvotes) / total_rated * 100`, signed.
    pub quality_score: f64,
    pub upvote_percentage: f64,
    pub downvote_percentage: f64,
    /// Share of completed tasks that received any rating.
    pub rating_coverage: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatingCharts {
    #[serde(default)]
    pub daily: Vec<PeriodRating>,
    #[serde(default)]
    pub hourly: Vec<PeriodRating>,
}

/// One chart bucket: ratings aggregated over a day or an hour.
#[derive(Debug, Clone, Deserialize)]
pub struct PeriodRating {
    pub period: String,
    pub upvotes: i64,
    pub downvotes: i64,
    pub total_rated: i64,
    pub quality_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_create_task_response() {
        let json = r#"{
            "success": true,
            "taskId": "0d4bf9be-2c15-4ab2-a373-90f13f8d7227",
            "estimatedTime": "~30 seconds",
            "token": "eyJhbGciOi..."
        }"#;

        let resp: CreateTaskResponse = serde_json::from_str(json).unwrap();
        assert!(resp.success);
        assert_eq!(resp.estimated_time, "~30 seconds");
        assert!(!resp.token.is_empty());
    }

    #[test]
    fn decodes_task_result_with_rfc3339_timestamps() {
        let json = r#"{
            "success": true,
            "status": "completed",
            "result": "A fine widget.",
            "createdAt": "2024-05-29T16:26:40Z",
            "processedAt": "2024-05-29T16:27:22Z",
            "rating": "upvote"
        }"#;

        let resp: TaskResultResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, TaskState::Completed);
        assert_eq!(resp.rating, Some(Rating::Upvote));
        assert_eq!(
            resp.processed_at.unwrap().timestamp_millis(),
            1717000042000
        );
    }

    #[test]
    fn decodes_pending_result_without_optionals() {
        let json = r#"{"success": true, "status": "pending", "result": null, "createdAt": "2024-05-29T16:26:40Z", "rating": null}"#;

        let resp: TaskResultResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, TaskState::Pending);
        assert!(resp.result.is_none());
        assert!(resp.processed_at.is_none());
    }

    #[test]
    fn decodes_user_snapshot() {
        let json = r#"{
            "success": true,
            "user_id": "user-42",
            "rate_limit": {
                "request_count": 3,
                "request_limit": 10,
                "window_start": 1717000000000,
                "last_request": 1717000042000,
                "period_start": "2024-05-29T16:26:40Z",
                "period_end": "2024-05-29T17:26:40Z"
            },
            "last_task": {"id": "t1", "status": "completed"}
        }"#;

        let snapshot: UserSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.user_id, "user-42");
        assert_eq!(snapshot.rate_limit.request_count, 3);
        assert_eq!(snapshot.last_task.unwrap()["id"], "t1");
    }

    #[test]
    fn vote_toggle_off_decodes_as_no_rating() {
        let resp: VoteResponse = serde_json::from_str(r#"{"success": true, "rating": null}"#).unwrap();
        assert!(resp.success);
        assert!(resp.rating.is_none());
    }

    #[test]
    fn generate_token_request_omits_unset_fields() {
        let req = GenerateTokenRequest {
            user_id: "user-42".into(),
            product_data: Some("Widget, blue, 3kg".into()),
            ..Default::default()
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["user_id"], "user-42");
        assert_eq!(json["product_data"], "Widget, blue, 3kg");
        assert!(json.get("priority").is_none());
        assert!(json.get("expires_in").is_none());
    }

    #[test]
    fn decodes_cleanup_response() {
        let json = r#"{
            "message": "Cleanup completed",
            "stats": {
                "totalTasks": 120,
                "pendingTasks": 4,
                "processingTasks": 2,
                "completedTasks": 100,
                "failedTasks": 14,
                "tasksOlderThan7Days": 37,
                "timedoutTasks": 1,
                "rateLimitRecords": 9
            },
            "cleaned": {"tasks": 37, "timedout": 1, "failed": 0, "rateLimits": 9}
        }"#;

        let resp: CleanupResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.stats.tasks_older_than_7_days, 37);
        assert_eq!(resp.cleaned.rate_limits, 9);
    }

    #[test]
    fn decodes_processor_metrics() {
        let json = r#"{
            "success": true,
            "processors": [{
                "processor_id": "proc-1",
                "cpu_usage": 42.5,
                "memory_usage": 63.0,
                "queue_size": 7,
                "last_updated": 1717000000000,
                "active_tasks": 3,
                "avg_processing_time": 1850.0
            }]
        }"#;

        let resp: ProcessorMetricsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.processors.len(), 1);
        assert_eq!(resp.processors[0].processor_id, "proc-1");
        assert_eq!(resp.processors[0].queue_size, 7);
    }

    #[test]
    fn decodes_rating_analytics() {
        let json = r#"{
            "success": true,
            "summary": {
                "upvotes": 40,
                "downvotes": 10,
                "total_rated": 50,
                "quality_score": 60.0,
                "upvote_percentage": 80.0,
                "downvote_percentage": 20.0,
                "rating_coverage": 25.0
            },
            "charts": {
                "daily": [{"period": "2024-05-29", "upvotes": 5, "downvotes": 1, "total_rated": 6, "quality_score": 66.7}],
                "hourly": []
            },
            "recent_ratings": []
        }"#;

        let resp: RatingAnalyticsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.summary.total_rated, 50);
        assert_eq!(resp.charts.daily.len(), 1);
        assert!(resp.charts.hourly.is_empty());
    }
}
