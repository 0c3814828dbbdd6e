//! REST API client for the proxy's HTTP endpoints.
//!
//! Public endpoints authenticate with a task-scoped bearer token passed
//! per call; internal admin endpoints use the internal API key the
//! client was built with.

use llmproxy_core::types::Rating;

use crate::responses::{
    CleanupResponse, CleanupStatsResponse, CreateTaskResponse, EstimatedTimeResponse,
    GenerateTokenRequest, HealthResponse, ProcessorMetricsResponse, RatingAnalyticsResponse,
    RatingStatsResponse, TaskListResponse, TaskResultResponse, TokenResponse, UserSnapshot,
    VoteResponse, WorkStealRequest, WorkStealResponse,
};

/// HTTP client for one proxy deployment.
pub struct ProxyClient {
    client: reqwest::Client,
    base_url: String,
    /// Internal API key; `None` for clients only using the public surface.
    api_key: Option<String>,
}

/// Errors from the proxy REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The proxy returned a non-2xx status code.
    #[error("proxy API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// An internal endpoint was called on a client built without an
    /// internal API key.
    #[error("internal API key not configured")]
    MissingApiKey,
}

impl ProxyClient {
    /// Create a client for the public surface only.
    ///
    /// * `base_url` - Base HTTP URL, e.g. `http://host:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`] (useful
    /// for connection pooling with the stream connector).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: None,
        }
    }

    /// Attach the internal API key, unlocking the `/api/internal/*`
    /// endpoints.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn api_key(&self) -> Result<&str, ApiError> {
        self.api_key.as_deref().ok_or(ApiError::MissingApiKey)
    }

    // ---- public surface ----

    /// Probe the proxy's health endpoint. No authentication.
    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        let response = self.client.get(self.url("/")).send().await?;
        Self::parse_response(response).await
    }

    /// Create a task from the data embedded in `token`.
    ///
    /// The returned result token supersedes the creation token for all
    /// further calls about this task, the status stream included.
    pub async fn create_task(&self, token: &str) -> Result<CreateTaskResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/api/create"))
            .bearer_auth(token)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the current result snapshot for the task bound into `token`.
    pub async fn get_result(&self, token: &str) -> Result<TaskResultResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/api/result"))
            .bearer_auth(token)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the calling user's latest task and rate-limit window.
    pub async fn user_snapshot(&self, token: &str) -> Result<UserSnapshot, ApiError> {
        let response = self
            .client
            .get(self.url("/api/get"))
            .query(&[("token", token)])
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Rate a completed task. Voting the same value again clears it;
    /// the response then carries no rating.
    pub async fn vote(
        &self,
        token: &str,
        task_id: &str,
        vote: Rating,
    ) -> Result<VoteResponse, ApiError> {
        let body = serde_json::json!({ "vote_type": vote.as_str() });

        let response = self
            .client
            .post(self.url(&format!("/api/tasks/{task_id}/vote")))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- internal surface ----

    /// Mint a task-creation token for a user.
    pub async fn generate_token(
        &self,
        request: &GenerateTokenRequest,
    ) -> Result<TokenResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/api/internal/generate-token"))
            .bearer_auth(self.api_key()?)
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// List tasks across all users, newest first.
    ///
    /// * `limit` - Page size; the server clamps to 1000, defaults to 50.
    /// * `user_id` - Restrict to one user's tasks.
    pub async fn all_tasks(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
        user_id: Option<&str>,
    ) -> Result<TaskListResponse, ApiError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        if let Some(user_id) = user_id {
            query.push(("user_id", user_id.to_string()));
        }

        let response = self
            .client
            .get(self.url("/api/internal/all-tasks"))
            .query(&query)
            .bearer_auth(self.api_key()?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Trigger a cleanup pass: prune old terminal tasks, requeue or fail
    /// heartbeat-timed-out ones, drop stale rate-limit rows.
    pub async fn cleanup(&self) -> Result<CleanupResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/api/internal/cleanup"))
            .bearer_auth(self.api_key()?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch queue statistics without mutating anything.
    pub async fn cleanup_stats(&self) -> Result<CleanupStatsResponse, ApiError> {
        let response = self
            .client
            .get(self.url("/api/internal/cleanup/stats"))
            .bearer_auth(self.api_key()?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Reassign queued tasks from overloaded processors to `processor_id`.
    pub async fn work_steal(
        &self,
        request: &WorkStealRequest,
    ) -> Result<WorkStealResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/api/internal/work-steal"))
            .bearer_auth(self.api_key()?)
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch per-processor load metrics for the fleet.
    pub async fn processor_metrics(&self) -> Result<ProcessorMetricsResponse, ApiError> {
        let response = self
            .client
            .get(self.url("/api/internal/metrics"))
            .bearer_auth(self.api_key()?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Expected queue wait for a newly created task, in milliseconds.
    pub async fn estimated_time(&self) -> Result<EstimatedTimeResponse, ApiError> {
        let response = self
            .client
            .get(self.url("/api/internal/estimated-time"))
            .bearer_auth(self.api_key()?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Rating totals, optionally scoped to one user (which also returns
    /// that user's rated tasks).
    pub async fn rating_stats(
        &self,
        user_id: Option<&str>,
    ) -> Result<RatingStatsResponse, ApiError> {
        let mut request = self
            .client
            .get(self.url("/api/internal/rating-stats"))
            .bearer_auth(self.api_key()?);
        if let Some(user_id) = user_id {
            request = request.query(&[("user_id", user_id)]);
        }

        let response = request.send().await?;
        Self::parse_response(response).await
    }

    /// Full rating analytics: summary cards, daily/hourly chart buckets,
    /// and the most recently rated tasks.
    pub async fn rating_analytics(&self) -> Result<RatingAnalyticsResponse, ApiError> {
        let response = self
            .client
            .get(self.url("/api/internal/rating-analytics"))
            .bearer_auth(self.api_key()?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Api`] containing
    /// the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(status = status.as_u16(), body = %body, "Proxy API call failed");
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
