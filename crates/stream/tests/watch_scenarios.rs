//! End-to-end watch scenarios against a scripted transport.
//!
//! These run the real driver loop under a paused tokio clock, so the
//! reconnect timing assertions are exact.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use llmproxy_stream::events::WatchEvent;
use llmproxy_stream::messages::{
    HeartbeatData, TaskCompletedData, TaskFailedData, TaskStatusData,
};
use llmproxy_stream::transport::{Connector, FrameStream, TransportError, WatchRequest};
use llmproxy_stream::{
    FatalError, Subscription, WatchHandler, WatchManager, WatchOutcome, WatchPolicy,
};

/// One scripted connection attempt.
enum Attempt {
    /// The attempt fails outright.
    Fail,
    /// The attempt opens and yields these frames, then the server closes.
    Frames(Vec<String>),
    /// The attempt never resolves; only the connect timeout ends it.
    Hang,
}

/// Pops one scripted [`Attempt`] per `connect` call and records when
/// each call happened (paused-clock instants).
#[derive(Clone)]
struct ScriptedConnector {
    script: Arc<Mutex<VecDeque<Attempt>>>,
    connect_times: Arc<Mutex<Vec<tokio::time::Instant>>>,
}

impl ScriptedConnector {
    fn new(script: Vec<Attempt>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            connect_times: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn attempts(&self) -> Vec<tokio::time::Instant> {
        self.connect_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _request: &WatchRequest) -> Result<FrameStream, TransportError> {
        self.connect_times
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());

        let attempt = self.script.lock().unwrap().pop_front();
        match attempt {
            Some(Attempt::Fail) => Err(TransportError::Connect("scripted failure".into())),
            Some(Attempt::Frames(frames)) => {
                let items = frames.into_iter().map(Ok).collect::<Vec<_>>();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Some(Attempt::Hang) => futures::future::pending().await,
            // An unscripted attempt is a test bug: the watch should have
            // settled before running out of script.
            None => panic!("connector called more times than scripted"),
        }
    }
}

/// Pushes a label per dispatched frame into a shared log, and can stop
/// its own subscription from inside a callback.
#[derive(Clone, Default)]
struct SinkHandler {
    events: Arc<Mutex<Vec<String>>>,
    stop_on_status: Option<CancellationToken>,
}

impl SinkHandler {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, label: String) {
        self.events.lock().unwrap().push(label);
    }
}

impl WatchHandler for SinkHandler {
    fn on_heartbeat(&mut self, _heartbeat: HeartbeatData) {
        self.push("heartbeat".into());
    }

    fn on_status(&mut self, status: TaskStatusData) {
        self.push(format!("status:{}", status.status));
        if let Some(cancel) = &self.stop_on_status {
            cancel.cancel();
        }
    }

    fn on_completed(&mut self, completed: TaskCompletedData) {
        self.push(format!("completed:{}", completed.result));
    }

    fn on_failed(&mut self, failed: TaskFailedData) {
        self.push(format!("failed:{}", failed.error.unwrap_or_default()));
    }

    fn on_fatal(&mut self, fatal: FatalError) {
        self.push(format!("fatal:{fatal}"));
    }
}

fn request() -> WatchRequest {
    WatchRequest::new("http://localhost:8080", "test-token").with_task_id("t1")
}

fn policy(max_reconnects: u32, reconnect_delay_ms: u64) -> WatchPolicy {
    WatchPolicy {
        max_reconnects,
        reconnect_delay: Duration::from_millis(reconnect_delay_ms),
        ..WatchPolicy::default()
    }
}

fn heartbeat_frame() -> String {
    r#"{"type":"heartbeat","data":{"message":"Connected to task polling"}}"#.into()
}

fn status_frame(status: &str) -> String {
    format!(r#"{{"type":"task_status","data":{{"taskId":"t1","status":"{status}"}}}}"#)
}

fn completed_frame(result: &str) -> String {
    format!(
        r#"{{"type":"task_completed","data":{{"taskId":"t1","status":"completed","result":"{result}"}}}}"#
    )
}

/// Scenario A: a clean stream dispatches in order and finalizes once.
#[tokio::test(start_paused = true)]
async fn clean_stream_dispatches_in_order_and_finalizes() {
    let connector = ScriptedConnector::new(vec![Attempt::Frames(vec![
        heartbeat_frame(),
        status_frame("processing"),
        completed_frame("done"),
    ])]);
    let handler = SinkHandler::default();

    let handle = Subscription::spawn(
        connector.clone(),
        request(),
        policy(5, 1_000),
        handler.clone(),
        CancellationToken::new(),
    );
    let outcome = handle.join().await.unwrap();

    assert!(outcome.is_finalized());
    assert!(matches!(outcome, WatchOutcome::Completed(ref data) if data.result == "done"));
    assert_eq!(
        handler.events(),
        vec!["heartbeat", "status:processing", "completed:done"]
    );
    assert_eq!(connector.attempts().len(), 1);
}

/// Scenario B: transient failures are retried on the policy cadence and
/// do not prevent eventual finalization.
#[tokio::test(start_paused = true)]
async fn three_failures_then_success_finalizes() {
    let connector = ScriptedConnector::new(vec![
        Attempt::Fail,
        Attempt::Fail,
        Attempt::Fail,
        Attempt::Frames(vec![completed_frame("done")]),
    ]);
    let handler = SinkHandler::default();

    let handle = Subscription::spawn(
        connector.clone(),
        request(),
        policy(5, 1_000),
        handler.clone(),
        CancellationToken::new(),
    );
    let outcome = handle.join().await.unwrap();

    assert!(matches!(outcome, WatchOutcome::Completed(_)));
    assert_eq!(handler.events(), vec!["completed:done"]);

    // Four attempts, each retry exactly one policy delay after the last.
    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 4);
    for pair in attempts.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_millis(1_000));
    }
}

/// Scenario C: the budget caps consecutive failures; no extra attempt,
/// exactly one fatal notification.
#[tokio::test(start_paused = true)]
async fn budget_exhaustion_aborts_after_exactly_max_attempts() {
    let connector = ScriptedConnector::new(vec![
        Attempt::Fail,
        Attempt::Fail,
        Attempt::Fail,
        Attempt::Fail,
        Attempt::Fail,
    ]);
    let handler = SinkHandler::default();

    let handle = Subscription::spawn(
        connector.clone(),
        request(),
        policy(5, 1_000),
        handler.clone(),
        CancellationToken::new(),
    );
    let outcome = handle.join().await.unwrap();

    assert!(matches!(
        outcome,
        WatchOutcome::Aborted(FatalError::BudgetExhausted { attempts: 5 })
    ));
    assert_eq!(connector.attempts().len(), 5);
    assert_eq!(
        handler.events(),
        vec!["fatal:reconnect budget exhausted after 5 consecutive failures"]
    );
}

/// Scenario D: a transient server error's delay hint overrides the
/// policy delay for that one retry.
#[tokio::test(start_paused = true)]
async fn server_delay_hint_overrides_policy_delay() {
    let connector = ScriptedConnector::new(vec![
        Attempt::Frames(vec![
            r#"{"type":"error","data":{"error":"Polling timeout exceeded","shouldReconnect":true,"reconnectDelay":2000}}"#.into(),
        ]),
        Attempt::Frames(vec![completed_frame("done")]),
    ]);
    let handler = SinkHandler::default();

    let handle = Subscription::spawn(
        connector.clone(),
        request(),
        policy(5, 5_000),
        handler.clone(),
        CancellationToken::new(),
    );
    let outcome = handle.join().await.unwrap();

    assert!(matches!(outcome, WatchOutcome::Completed(_)));
    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1] - attempts[0], Duration::from_millis(2_000));
}

/// A hung connection attempt is cut off by the connect timeout and
/// counted like any other failure.
#[tokio::test(start_paused = true)]
async fn hung_connect_attempt_times_out_and_retries() {
    let connector = ScriptedConnector::new(vec![
        Attempt::Hang,
        Attempt::Frames(vec![completed_frame("done")]),
    ]);
    let handler = SinkHandler::default();

    let policy = WatchPolicy {
        max_reconnects: 5,
        reconnect_delay: Duration::from_millis(1_000),
        connect_timeout: Duration::from_millis(3_000),
    };
    let handle = Subscription::spawn(
        connector.clone(),
        request(),
        policy,
        handler.clone(),
        CancellationToken::new(),
    );
    let outcome = handle.join().await.unwrap();

    assert!(matches!(outcome, WatchOutcome::Completed(_)));
    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 2);
    // Timeout at +3000 ms, retry one policy delay later.
    assert_eq!(attempts[1] - attempts[0], Duration::from_millis(4_000));
}

/// A server close without a terminal frame is a transport failure, not
/// the end of the watch.
#[tokio::test(start_paused = true)]
async fn early_close_without_terminal_reconnects() {
    let connector = ScriptedConnector::new(vec![
        Attempt::Frames(vec![heartbeat_frame(), status_frame("pending")]),
        Attempt::Frames(vec![completed_frame("done")]),
    ]);
    let handler = SinkHandler::default();

    let handle = Subscription::spawn(
        connector.clone(),
        request(),
        policy(5, 1_000),
        handler.clone(),
        CancellationToken::new(),
    );
    let outcome = handle.join().await.unwrap();

    assert!(matches!(outcome, WatchOutcome::Completed(_)));
    assert_eq!(
        handler.events(),
        vec!["heartbeat", "status:pending", "completed:done"]
    );
    assert_eq!(connector.attempts().len(), 2);
}

/// Stopping from the caller is silent and idempotent.
#[tokio::test(start_paused = true)]
async fn caller_stop_is_silent_and_idempotent() {
    // Scripted to hang so the watch would otherwise stay connecting.
    let connector = ScriptedConnector::new(vec![Attempt::Hang]);
    let handler = SinkHandler::default();

    let handle = Subscription::spawn(
        connector,
        request(),
        policy(5, 1_000),
        handler.clone(),
        CancellationToken::new(),
    );

    handle.stop();
    handle.stop();
    let outcome = handle.join().await.unwrap();

    assert!(matches!(outcome, WatchOutcome::Stopped));
    assert!(handler.events().is_empty());
}

/// A handler can stop its own watch from inside a callback; frames
/// already queued behind the cancellation are not dispatched.
#[tokio::test(start_paused = true)]
async fn handler_can_stop_its_own_watch() {
    let connector = ScriptedConnector::new(vec![Attempt::Frames(vec![
        status_frame("processing"),
        completed_frame("done"),
    ])]);
    let cancel = CancellationToken::new();
    let handler = SinkHandler {
        events: Arc::new(Mutex::new(Vec::new())),
        stop_on_status: Some(cancel.clone()),
    };

    let handle = Subscription::spawn(
        connector,
        request(),
        policy(5, 1_000),
        handler.clone(),
        cancel,
    );
    let outcome = handle.join().await.unwrap();

    assert!(matches!(outcome, WatchOutcome::Stopped));
    assert_eq!(handler.events(), vec!["status:processing"]);
}

/// Frames after the terminal one are not dispatched, and the terminal
/// handler fires exactly once.
#[tokio::test(start_paused = true)]
async fn frames_after_terminal_are_ignored() {
    let connector = ScriptedConnector::new(vec![Attempt::Frames(vec![
        completed_frame("done"),
        completed_frame("again"),
        status_frame("processing"),
    ])]);
    let handler = SinkHandler::default();

    let handle = Subscription::spawn(
        connector,
        request(),
        policy(5, 1_000),
        handler.clone(),
        CancellationToken::new(),
    );
    let outcome = handle.join().await.unwrap();

    assert!(matches!(outcome, WatchOutcome::Completed(_)));
    assert_eq!(handler.events(), vec!["completed:done"]);
}

/// A fatal server error frame ends the watch with one fatal
/// notification and no reconnect.
#[tokio::test(start_paused = true)]
async fn fatal_server_error_aborts_without_retry() {
    let connector = ScriptedConnector::new(vec![Attempt::Frames(vec![
        r#"{"type":"error","data":{"error":"Invalid token"}}"#.into(),
    ])]);
    let handler = SinkHandler::default();

    let handle = Subscription::spawn(
        connector.clone(),
        request(),
        policy(5, 1_000),
        handler.clone(),
        CancellationToken::new(),
    );
    let outcome = handle.join().await.unwrap();

    assert!(matches!(
        outcome,
        WatchOutcome::Aborted(FatalError::Server { .. })
    ));
    assert_eq!(connector.attempts().len(), 1);
    assert_eq!(handler.events(), vec!["fatal:server error: Invalid token"]);
}

/// A failed task finalizes the watch just like a completed one.
#[tokio::test(start_paused = true)]
async fn failed_task_finalizes() {
    let connector = ScriptedConnector::new(vec![Attempt::Frames(vec![
        r#"{"type":"task_failed","data":{"taskId":"t1","status":"failed","error":"model crashed"}}"#
            .into(),
    ])]);
    let handler = SinkHandler::default();

    let handle = Subscription::spawn(
        connector,
        request(),
        policy(5, 1_000),
        handler.clone(),
        CancellationToken::new(),
    );
    let outcome = handle.join().await.unwrap();

    assert!(outcome.is_finalized());
    assert!(matches!(outcome, WatchOutcome::Failed(_)));
    assert_eq!(handler.events(), vec!["failed:model crashed"]);
}

// ---- manager-level scenarios ----

async fn next_closed(rx: &mut tokio::sync::broadcast::Receiver<WatchEvent>) -> (String, WatchOutcome) {
    loop {
        match rx.recv().await.unwrap() {
            WatchEvent::Closed { key, outcome } => return (key, outcome),
            _ => continue,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn manager_runs_watches_to_completion() {
    let connector = ScriptedConnector::new(vec![Attempt::Frames(vec![completed_frame("done")])]);
    let manager = WatchManager::new(Arc::new(connector));
    let mut events = manager.subscribe();

    let handler = SinkHandler::default();
    manager
        .watch("t1", request(), policy(5, 1_000), handler.clone())
        .await;

    let (key, outcome) = next_closed(&mut events).await;
    assert_eq!(key, "t1");
    assert!(matches!(outcome, WatchOutcome::Completed(_)));
    assert_eq!(handler.events(), vec!["completed:done"]);
}

/// A watch that reaches its outcome is reaped from the manager's map;
/// by the time its `Closed` event is observable it is no longer active.
#[tokio::test(start_paused = true)]
async fn manager_reaps_finished_watches() {
    let connector = ScriptedConnector::new(vec![Attempt::Frames(vec![completed_frame("done")])]);
    let manager = WatchManager::new(Arc::new(connector));
    let mut events = manager.subscribe();

    manager
        .watch("t1", request(), policy(5, 1_000), SinkHandler::default())
        .await;

    let (key, outcome) = next_closed(&mut events).await;
    assert_eq!(key, "t1");
    assert!(matches!(outcome, WatchOutcome::Completed(_)));
    assert!(manager.active_keys().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn manager_supersedes_watch_under_same_key() {
    // First watch hangs; the second completes.
    let connector = ScriptedConnector::new(vec![
        Attempt::Hang,
        Attempt::Frames(vec![completed_frame("done")]),
    ]);
    let manager = WatchManager::new(Arc::new(connector));
    let mut events = manager.subscribe();

    let first = SinkHandler::default();
    manager
        .watch("t1", request(), policy(5, 1_000), first.clone())
        .await;

    // Let the first driver reach its (hanging) connect attempt before
    // superseding it, so the attempt order is deterministic.
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let second = SinkHandler::default();
    manager
        .watch("t1", request(), policy(5, 1_000), second.clone())
        .await;

    // The superseded watch closes as stopped, the replacement finalizes;
    // the two closures race, so collect both before asserting.
    let mut outcomes = vec![next_closed(&mut events).await.1, next_closed(&mut events).await.1];
    outcomes.sort_by_key(|o| o.describe());
    assert!(matches!(outcomes[0], WatchOutcome::Completed(_)));
    assert!(matches!(outcomes[1], WatchOutcome::Stopped));

    assert!(first.events().is_empty());
    assert_eq!(second.events(), vec!["completed:done"]);
}

#[tokio::test(start_paused = true)]
async fn manager_shutdown_stops_all_watches() {
    let connector = ScriptedConnector::new(vec![Attempt::Hang, Attempt::Hang]);
    let manager = WatchManager::new(Arc::new(connector));

    manager
        .watch("t1", request(), policy(5, 1_000), SinkHandler::default())
        .await;
    manager
        .watch("t2", request(), policy(5, 1_000), SinkHandler::default())
        .await;
    assert_eq!(manager.active_keys().await.len(), 2);

    manager.shutdown().await;
    assert!(manager.active_keys().await.is_empty());
}
