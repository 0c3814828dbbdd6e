//! `llmproxy-monitor` -- operator console for the task proxy.
//!
//! Mints a token, creates one generation task, follows its status
//! stream to the terminal outcome, then prints fleet metrics and the
//! rating summary. Exits 0 only if the task completed.
//!
//! # Environment variables
//!
//! | Variable          | Required | Default          | Description                                  |
//! |-------------------|----------|------------------|----------------------------------------------|
//! | `PROXY_BASE_URL`  | yes      | --               | Proxy base URL, e.g. `http://localhost:8080` |
//! | `PROXY_API_KEY`   | yes      | --               | Internal API key for `/api/internal/*`       |
//! | `MONITOR_PROMPT`  | no       | `Test generation`| Product data for the probe task              |
//! | `MONITOR_USER_ID` | no       | generated UUID   | User id the probe task is created under      |

use llmproxy_client::responses::GenerateTokenRequest;
use llmproxy_client::ProxyClient;
use llmproxy_core::types::from_epoch_millis;
use llmproxy_stream::messages::{TaskCompletedData, TaskFailedData, TaskStatusData};
use llmproxy_stream::{
    FatalError, SseConnector, Subscription, WatchHandler, WatchOutcome, WatchPolicy, WatchRequest,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
struct MonitorConfig {
    base_url: String,
    api_key: String,
    prompt: String,
    user_id: String,
}

impl MonitorConfig {
    /// Load configuration, exiting with an error log if a required
    /// variable is missing.
    fn from_env() -> Self {
        let base_url = std::env::var("PROXY_BASE_URL").unwrap_or_else(|_| {
            tracing::error!("PROXY_BASE_URL environment variable is required");
            std::process::exit(1);
        });

        let api_key = std::env::var("PROXY_API_KEY").unwrap_or_else(|_| {
            tracing::error!("PROXY_API_KEY environment variable is required");
            std::process::exit(1);
        });

        let prompt =
            std::env::var("MONITOR_PROMPT").unwrap_or_else(|_| "Test generation".to_string());

        let user_id = std::env::var("MONITOR_USER_ID")
            .unwrap_or_else(|_| format!("monitor-{}", uuid::Uuid::new_v4()));

        Self {
            base_url,
            api_key,
            prompt,
            user_id,
        }
    }
}

/// Logs every frame of the probe task's stream.
struct StatusLogger;

impl WatchHandler for StatusLogger {
    fn on_status(&mut self, status: TaskStatusData) {
        let started = status
            .processing_started_at
            .and_then(from_epoch_millis);
        tracing::info!(
            task_id = ?status.task_id,
            status = %status.status,
            processing_started_at = ?started,
            "Task status",
        );
    }

    fn on_completed(&mut self, completed: TaskCompletedData) {
        tracing::info!(task_id = %completed.task_id, "Task completed");
        println!("{}", completed.result);
    }

    fn on_failed(&mut self, failed: TaskFailedData) {
        tracing::error!(
            task_id = %failed.task_id,
            error = ?failed.error,
            "Task failed",
        );
    }

    fn on_fatal(&mut self, fatal: FatalError) {
        tracing::error!(error = %fatal, "Watch gave up");
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llmproxy_monitor=info,llmproxy_stream=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MonitorConfig::from_env();

    tracing::info!(
        base_url = %config.base_url,
        user_id = %config.user_id,
        "Starting llmproxy-monitor",
    );

    match run(&config).await {
        Ok(outcome) => {
            let code = match outcome {
                WatchOutcome::Completed(_) => 0,
                WatchOutcome::Failed(_) => 2,
                WatchOutcome::Stopped | WatchOutcome::Aborted(_) => 3,
            };
            std::process::exit(code);
        }
        Err(e) => {
            tracing::error!(error = %e, "Monitor run failed");
            std::process::exit(1);
        }
    }
}

async fn run(config: &MonitorConfig) -> anyhow::Result<WatchOutcome> {
    let http = reqwest::Client::new();
    let client = ProxyClient::with_client(http.clone(), &config.base_url)
        .with_api_key(&config.api_key);

    // Mint a creation token carrying the prompt, then create the task.
    let token = client
        .generate_token(&GenerateTokenRequest {
            user_id: config.user_id.clone(),
            product_data: Some(config.prompt.clone()),
            ..Default::default()
        })
        .await?;

    let created = client.create_task(&token.token).await?;
    tracing::info!(
        task_id = %created.task_id,
        estimated_time = %created.estimated_time,
        "Task created",
    );

    // Follow the status stream to the terminal outcome. The result token
    // from creation authorizes the stream.
    let request = WatchRequest::new(&config.base_url, &created.token)
        .with_task_id(&created.task_id);
    let handle = Subscription::spawn(
        SseConnector::with_client(http),
        request,
        WatchPolicy::default(),
        StatusLogger,
        CancellationToken::new(),
    );
    let outcome = handle.join().await?;
    tracing::info!(outcome = outcome.describe(), "Watch finished");

    // Fleet and rating overview, dashboard-style.
    let metrics = client.processor_metrics().await?;
    for processor in &metrics.processors {
        tracing::info!(
            processor_id = %processor.processor_id,
            cpu_usage = processor.cpu_usage,
            memory_usage = processor.memory_usage,
            queue_size = processor.queue_size,
            active_tasks = processor.active_tasks,
            avg_processing_time_ms = processor.avg_processing_time,
            "Processor load",
        );
    }
    if metrics.processors.is_empty() {
        tracing::warn!("No processors reporting metrics");
    }

    let ratings = client.rating_stats(None).await?;
    tracing::info!(
        total_rated = ratings.total_rated,
        upvotes = ratings.upvotes,
        downvotes = ratings.downvotes,
        "Rating summary",
    );

    Ok(outcome)
}
