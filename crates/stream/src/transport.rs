//! Transport layer for the status stream.
//!
//! [`Connector`] is the seam between the subscription state machine and the
//! wire: one call opens one server-push channel and yields its frame bodies
//! as a stream of strings. The production implementation,
//! [`SseConnector`], speaks `text/event-stream` over HTTP. Tests substitute
//! scripted connectors.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};

/// Path of the task status-streaming endpoint, relative to the proxy base.
pub const STREAM_PATH: &str = "/api/result-polling";

/// Frame bodies from one open channel. Ends (`None`) when the server
/// closes the connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Failures below the message layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection attempt itself failed (DNS, TCP, TLS, malformed
    /// response head).
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered the subscription request with a non-success
    /// status instead of a stream.
    #[error("stream endpoint returned HTTP {status}")]
    Status { status: u16 },

    /// An open channel broke mid-stream.
    #[error("stream error: {0}")]
    Stream(String),

    /// The server closed the channel before a terminal frame arrived.
    #[error("stream closed by server")]
    Closed,

    /// The attempt did not open within the policy's connect timeout.
    #[error("connection attempt timed out")]
    ConnectTimeout,
}

/// Parameters for one watch: where to connect and how the server should
/// pace the stream.
///
/// The `token` is the task-scoped result token minted by task creation; it
/// authorizes the stream and identifies the task, so it must not be empty.
/// `task_id` is sent alongside for servers that allow watching a task other
/// than the one bound into the token.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    base_url: String,
    token: String,
    task_id: Option<String>,
    poll_interval: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    max_duration: Option<Duration>,
}

impl WatchRequest {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            task_id: None,
            poll_interval: None,
            heartbeat_interval: None,
            max_duration: None,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// How often the server should check task state. The server clamps
    /// this to 1-10 seconds.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// How often the server should emit heartbeats. The server clamps
    /// this to 15-60 seconds.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// How long the server keeps one channel open before ending it with a
    /// retryable timeout error. The server clamps this to 1-10 minutes.
    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    /// Full endpoint URL without the query string.
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), STREAM_PATH)
    }

    /// Query pairs for the subscription request.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("token", self.token.clone())];
        if let Some(task_id) = &self.task_id {
            pairs.push(("taskId", task_id.clone()));
        }
        if let Some(interval) = self.poll_interval {
            pairs.push(("pollInterval", interval.as_millis().to_string()));
        }
        if let Some(interval) = self.heartbeat_interval {
            pairs.push(("heartbeatInterval", interval.as_millis().to_string()));
        }
        if let Some(duration) = self.max_duration {
            pairs.push(("maxDuration", duration.as_millis().to_string()));
        }
        pairs
    }
}

/// Opens one server-push channel per call.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: &WatchRequest) -> Result<FrameStream, TransportError>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    async fn connect(&self, request: &WatchRequest) -> Result<FrameStream, TransportError> {
        (**self).connect(request).await
    }
}

/// Production connector: HTTP GET with `Accept: text/event-stream`, frames
/// decoded by [`eventsource_stream`].
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone, Default)]
pub struct SseConnector {
    http: reqwest::Client,
}

impl SseConnector {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Build against a caller-provided HTTP client (custom TLS, proxies).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Connector for SseConnector {
    async fn connect(&self, request: &WatchRequest) -> Result<FrameStream, TransportError> {
        let response = self
            .http
            .get(request.url())
            .query(&request.query())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        tracing::debug!(task_id = ?request.task_id(), "Status stream connected");

        // Comment lines (`: ping` keepalives) never surface here; the
        // decoder only yields complete data events.
        let frames = response.bytes_stream().eventsource().map(|item| match item {
            Ok(event) => Ok(event.data),
            Err(e) => Err(TransportError::Stream(e.to_string())),
        });

        Ok(Box::pin(frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path() {
        let request = WatchRequest::new("http://localhost:8080", "tok");
        assert_eq!(request.url(), "http://localhost:8080/api/result-polling");

        let trailing = WatchRequest::new("http://localhost:8080/", "tok");
        assert_eq!(trailing.url(), "http://localhost:8080/api/result-polling");
    }

    #[test]
    fn query_always_carries_the_token() {
        let request = WatchRequest::new("http://localhost:8080", "tok-123");
        assert_eq!(request.query(), vec![("token", "tok-123".to_string())]);
    }

    #[test]
    fn query_includes_optional_pacing_params() {
        let request = WatchRequest::new("http://localhost:8080", "tok")
            .with_task_id("t1")
            .with_poll_interval(Duration::from_millis(2_000))
            .with_heartbeat_interval(Duration::from_secs(30))
            .with_max_duration(Duration::from_secs(300));

        let query = request.query();
        assert!(query.contains(&("taskId", "t1".to_string())));
        assert!(query.contains(&("pollInterval", "2000".to_string())));
        assert!(query.contains(&("heartbeatInterval", "30000".to_string())));
        assert!(query.contains(&("maxDuration", "300000".to_string())));
    }
}
