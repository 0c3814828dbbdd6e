//! The status subscription: a reconnecting state machine over one task's
//! push channel.
//!
//! One [`Subscription`] tracks one task from [`spawn`] to a single terminal
//! outcome. All state transitions go through [`Subscription::on_event`],
//! which is synchronous and side-effect free apart from handler dispatch;
//! the async driver loop only opens channels, pulls frames, sleeps out
//! backoff delays, and races everything against the cancellation token.
//!
//! [`spawn`]: Subscription::spawn

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::handler::{FatalError, WatchHandler};
use crate::messages::{parse_message, StreamMessage, TaskCompletedData, TaskFailedData};
use crate::policy::{ReconnectBudget, WatchPolicy};
use crate::transport::{Connector, FrameStream, TransportError, WatchRequest};

/// Where a subscription currently is in its lifecycle.
///
/// `Finalized` and `Aborted` are terminal. `Finalized` means the watched
/// task itself ended (completed or failed); `Aborted` means the watch ended
/// without a terminal frame (stopped by the caller, reconnect budget spent,
/// or a fatal server error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Finalized,
    Aborted,
}

/// How a subscription ended.
#[derive(Debug, Clone)]
pub enum WatchOutcome {
    /// A `task_completed` frame arrived and was delivered.
    Completed(TaskCompletedData),
    /// A `task_failed` frame arrived and was delivered.
    Failed(TaskFailedData),
    /// The caller cancelled the watch first.
    Stopped,
    /// The watch gave up: reconnect budget spent or fatal server error.
    Aborted(FatalError),
}

impl WatchOutcome {
    /// Whether the watched task itself reached a terminal state.
    pub fn is_finalized(&self) -> bool {
        matches!(self, WatchOutcome::Completed(_) | WatchOutcome::Failed(_))
    }

    /// Short lowercase label for logs.
    pub fn describe(&self) -> &'static str {
        match self {
            WatchOutcome::Completed(_) => "completed",
            WatchOutcome::Failed(_) => "failed",
            WatchOutcome::Stopped => "stopped",
            WatchOutcome::Aborted(_) => "aborted",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// The driver task panicked before producing an outcome.
    #[error("subscription task panicked")]
    TaskPanicked,
}

/// Everything that can drive a state transition.
#[derive(Debug)]
enum StreamEvent {
    /// The driver is about to make its first connection attempt.
    StartRequested,
    /// A connection attempt produced an open channel.
    Opened,
    /// One frame body arrived on the open channel.
    Frame(String),
    /// The attempt failed, the channel broke, or the connect timed out.
    TransportFailed(TransportError),
    /// The backoff delay elapsed.
    ReconnectDue,
    /// The cancellation token fired.
    Stopped,
}

/// What the driver should do after a transition.
#[derive(Debug, PartialEq)]
enum Step {
    /// Make a connection attempt.
    Connect,
    /// Pull the next frame off the open channel.
    ReadFrame,
    /// Sleep, then reconnect.
    Backoff(Duration),
    /// Terminal; the driver exits.
    Finish,
}

/// State machine for one task watch. Construct through [`Subscription::spawn`].
pub struct Subscription<H: WatchHandler> {
    policy: WatchPolicy,
    budget: ReconnectBudget,
    handler: H,
    state_tx: watch::Sender<SubscriptionState>,
    /// Set exactly once, before the terminal handler dispatch. Once set,
    /// every further event is inert.
    finalized: bool,
    outcome: Option<WatchOutcome>,
}

impl<H: WatchHandler> Subscription<H> {
    fn new(policy: WatchPolicy, handler: H) -> (Self, watch::Receiver<SubscriptionState>) {
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Idle);
        let subscription = Self {
            budget: ReconnectBudget::new(policy.max_reconnects),
            policy,
            handler,
            state_tx,
            finalized: false,
            outcome: None,
        };
        (subscription, state_rx)
    }

    /// Spawn the driver task for one watch.
    ///
    /// The returned handle stops the watch through `cancel`; the token may
    /// be cloned into the handler so it can stop its own subscription from
    /// inside a callback.
    pub fn spawn<C>(
        connector: C,
        request: WatchRequest,
        policy: WatchPolicy,
        handler: H,
        cancel: CancellationToken,
    ) -> SubscriptionHandle
    where
        C: Connector + 'static,
    {
        let (subscription, state_rx) = Subscription::new(policy, handler);
        let task = tokio::spawn(subscription.run(connector, request, cancel.clone()));
        SubscriptionHandle {
            cancel,
            task,
            state_rx,
        }
    }

    fn set_state(&mut self, state: SubscriptionState) {
        let _ = self.state_tx.send(state);
    }

    /// The single transition function. Every event goes through here, in
    /// order, whatever its source.
    fn on_event(&mut self, event: StreamEvent) -> Step {
        if self.finalized {
            // Late events against a settled subscription are inert. In
            // particular a transport teardown right after a terminal frame
            // is expected, not a failure.
            if let StreamEvent::TransportFailed(error) = &event {
                tracing::debug!(error = %error, "Transport settled after close");
            }
            return Step::Finish;
        }

        match event {
            StreamEvent::StartRequested => {
                if self.budget.is_exhausted() {
                    // A zero-reconnect policy refuses even the first attempt.
                    return self.abort(FatalError::BudgetExhausted {
                        attempts: self.budget.failures(),
                    });
                }
                self.set_state(SubscriptionState::Connecting);
                Step::Connect
            }
            StreamEvent::Opened => {
                self.budget.record_open();
                self.set_state(SubscriptionState::Open);
                tracing::info!("Status stream open");
                Step::ReadFrame
            }
            StreamEvent::Frame(raw) => self.on_frame(&raw),
            StreamEvent::TransportFailed(error) => {
                tracing::warn!(error = %error, "Status stream transport failure");
                self.schedule_reconnect(None)
            }
            StreamEvent::ReconnectDue => {
                self.set_state(SubscriptionState::Connecting);
                Step::Connect
            }
            StreamEvent::Stopped => {
                tracing::debug!("Subscription stopped by caller");
                self.finish(SubscriptionState::Aborted, WatchOutcome::Stopped)
            }
        }
    }

    // ---- individual frame handlers ----

    fn on_frame(&mut self, raw: &str) -> Step {
        let message = match parse_message(raw) {
            Ok(message) => message,
            Err(error) => {
                // A frame we cannot decode is dropped; the channel itself
                // is still healthy.
                tracing::warn!(error = %error, raw_frame = %raw, "Failed to decode stream frame");
                return Step::ReadFrame;
            }
        };

        match message {
            StreamMessage::Heartbeat(data) => {
                tracing::trace!(task_id = ?data.task_id, "Heartbeat");
                self.handler.on_heartbeat(data);
                Step::ReadFrame
            }
            StreamMessage::TaskStatus(data) => {
                tracing::debug!(task_id = ?data.task_id, status = %data.status, "Task status update");
                self.handler.on_status(data);
                Step::ReadFrame
            }
            StreamMessage::TaskCompleted(data) => {
                tracing::info!(task_id = %data.task_id, "Task completed");
                self.finalized = true;
                self.set_state(SubscriptionState::Finalized);
                self.handler.on_completed(data.clone());
                self.outcome = Some(WatchOutcome::Completed(data));
                Step::Finish
            }
            StreamMessage::TaskFailed(data) => {
                tracing::info!(task_id = %data.task_id, error = ?data.error, "Task failed");
                self.finalized = true;
                self.set_state(SubscriptionState::Finalized);
                self.handler.on_failed(data.clone());
                self.outcome = Some(WatchOutcome::Failed(data));
                Step::Finish
            }
            StreamMessage::Error(data) if data.is_transient() => {
                tracing::warn!(error = %data.error, "Server reported transient error");
                let hint = data.reconnect_delay.map(Duration::from_millis);
                self.schedule_reconnect(hint)
            }
            StreamMessage::Error(data) => {
                tracing::error!(error = %data.error, "Server reported fatal error");
                self.abort(FatalError::Server {
                    message: data.error,
                })
            }
            StreamMessage::Unknown { kind, data } => {
                self.handler.on_unrecognized(&kind, &data);
                Step::ReadFrame
            }
        }
    }

    /// Count a failure and either arm the backoff timer or abort.
    ///
    /// `hint` is the server-suggested delay from an error frame; it applies
    /// to this one delay only.
    fn schedule_reconnect(&mut self, hint: Option<Duration>) -> Step {
        self.budget.record_failure();
        if self.budget.is_exhausted() {
            return self.abort(FatalError::BudgetExhausted {
                attempts: self.budget.failures(),
            });
        }

        let delay = hint.unwrap_or(self.policy.reconnect_delay);
        self.set_state(SubscriptionState::Reconnecting);
        tracing::info!(
            attempt = self.budget.failures(),
            max_attempts = self.policy.max_reconnects,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        Step::Backoff(delay)
    }

    fn abort(&mut self, fatal: FatalError) -> Step {
        tracing::error!(error = %fatal, "Subscription aborting");
        self.finalized = true;
        self.set_state(SubscriptionState::Aborted);
        self.handler.on_fatal(fatal.clone());
        self.outcome = Some(WatchOutcome::Aborted(fatal));
        Step::Finish
    }

    fn finish(&mut self, state: SubscriptionState, outcome: WatchOutcome) -> Step {
        self.finalized = true;
        self.set_state(state);
        self.outcome = Some(outcome);
        Step::Finish
    }

    /// Driver loop. Owns the transport; `on_event` owns the decisions.
    async fn run<C>(
        mut self,
        connector: C,
        request: WatchRequest,
        cancel: CancellationToken,
    ) -> WatchOutcome
    where
        C: Connector,
    {
        let mut frames: Option<FrameStream> = None;
        let mut step = self.on_event(StreamEvent::StartRequested);

        loop {
            if !matches!(step, Step::ReadFrame) {
                // Whatever comes next, the current channel is done.
                frames = None;
            }

            step = match step {
                Step::Finish => break,

                Step::Connect => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => self.on_event(StreamEvent::Stopped),
                        attempt = tokio::time::timeout(
                            self.policy.connect_timeout,
                            connector.connect(&request),
                        ) => match attempt {
                            Ok(Ok(stream)) => {
                                frames = Some(stream);
                                self.on_event(StreamEvent::Opened)
                            }
                            Ok(Err(error)) => self.on_event(StreamEvent::TransportFailed(error)),
                            Err(_) => self.on_event(StreamEvent::TransportFailed(
                                TransportError::ConnectTimeout,
                            )),
                        },
                    }
                }

                Step::ReadFrame => match frames.as_mut() {
                    Some(stream) => {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => self.on_event(StreamEvent::Stopped),
                            frame = stream.next() => match frame {
                                Some(Ok(raw)) => self.on_event(StreamEvent::Frame(raw)),
                                Some(Err(error)) => {
                                    self.on_event(StreamEvent::TransportFailed(error))
                                }
                                None => self.on_event(StreamEvent::TransportFailed(
                                    TransportError::Closed,
                                )),
                            },
                        }
                    }
                    None => self.on_event(StreamEvent::TransportFailed(TransportError::Closed)),
                },

                Step::Backoff(delay) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => self.on_event(StreamEvent::Stopped),
                        _ = tokio::time::sleep(delay) => self.on_event(StreamEvent::ReconnectDue),
                    }
                }
            };
        }

        let outcome = self.outcome.take().unwrap_or(WatchOutcome::Stopped);
        tracing::info!(
            task_id = ?request.task_id(),
            outcome = outcome.describe(),
            "Subscription closed"
        );
        outcome
    }
}

/// Owner's view of a spawned subscription.
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<WatchOutcome>,
    state_rx: watch::Receiver<SubscriptionState>,
}

impl SubscriptionHandle {
    /// Stop the watch. Idempotent, synchronous, and safe to call from
    /// anywhere, including from inside a handler callback holding a clone
    /// of the token.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// A clone of the token that stops this watch.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        *self.state_rx.borrow()
    }

    /// A receiver that observes every state change, usable after `join`.
    pub fn state_changes(&self) -> watch::Receiver<SubscriptionState> {
        self.state_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the driver to exit and return how the watch ended.
    pub async fn join(self) -> Result<WatchOutcome, SubscriptionError> {
        self.task.await.map_err(|_| SubscriptionError::TaskPanicked)
    }
}
