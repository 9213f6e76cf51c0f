//! # Command Execution Unit
//!
//! One [`CommandExecution`] drives one command from its first attempt to the single
//! outcome delivered to the caller. It owns the iteration count, the computed
//! deadline and the in-doubt flag of the command, and it is the only place where
//! retry and deadline decisions are made.
//!
//! ## State machine
//!
//! ```text
//!  Idle ──▶ Sending ──▶ AwaitingResponse ──▶ Succeeded
//!              ▲               │
//!              │               ├──▶ Failed
//!              │               ├──▶ Expired
//!              └─ RetryScheduled ◀┘
//! ```
//!
//! ## Retry rule
//!
//! A retryable failure on attempt `n` schedules attempt `n + 1` when
//! `n <= max_retries` and, if the command has a total deadline, sleeping
//! `sleep_between_retries` still ends before it. Otherwise the command fails: with
//! the classified error flagged as retries-exhausted, or with a timeout when the
//! budget is spent. Non-retryable failures and decoded result codes are reported as
//! they are.
//!
//! Every attempt is rebuilt from the immutable command inputs plus a fresh
//! [`AttemptContext`]; nothing of a previous attempt is reused.

use crate::codec::{Codec, DecodedResponse, JsonCodec, RequestTimeouts};
use crate::constants::{defaults, ResultCode};
use crate::error::{ClientError, ErrorKind};
use crate::execution::call::{CallEvent, StreamingCall};
use crate::execution::classifier::{ErrorClassifier, StandardErrorClassifier, TransportFailure};
use crate::execution::command::{Command, CommandKind};
use crate::execution::deadline::{compute_budget, Budget};
use crate::execution::metrics::EngineMetrics;
use crate::execution::tracker::CallTracker;
use crate::execution::transport::Transport;
use crate::listener::Annotation;
use crate::logging::log_command_operation;
use crate::policy::Policy;
use crate::routing::{Node, Router};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Collaborators shared by every command of a client
pub struct EngineContext {
    pub transport: Arc<dyn Transport>,
    pub router: Arc<dyn Router>,
    pub codec: Arc<dyn Codec>,
    pub classifier: Arc<dyn ErrorClassifier>,
    pub tracker: Arc<CallTracker>,
    pub metrics: Arc<EngineMetrics>,
    /// Expiry given to calls without a deadline on bindings that require one
    pub fallback_call_timeout: Duration,
}

impl EngineContext {
    /// Context with the JSON codec, the standard classifier and fresh tracker and
    /// metrics
    pub fn new(transport: Arc<dyn Transport>, router: Arc<dyn Router>) -> Self {
        Self {
            transport,
            router,
            codec: Arc::new(JsonCodec::new()),
            classifier: Arc::new(StandardErrorClassifier::new()),
            tracker: Arc::new(CallTracker::new()),
            metrics: Arc::new(EngineMetrics::new()),
            fallback_call_timeout: Duration::from_millis(defaults::FALLBACK_CALL_TIMEOUT_MS),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_fallback_call_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_call_timeout = timeout;
        self
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("transport", &self.transport)
            .field("router", &self.router)
            .field("codec", &self.codec)
            .field("classifier", &self.classifier.classifier_name())
            .field("fallback_call_timeout", &self.fallback_call_timeout)
            .finish()
    }
}

/// Execution states of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Created, not started
    Idle,
    /// Routing and encoding an attempt
    Sending,
    /// Attempt handed to the transport
    AwaitingResponse,
    /// A terminal response arrived
    Succeeded,
    /// Waiting out the delay before the next attempt
    RetryScheduled,
    /// Gave up with an error
    Failed,
    /// Total deadline reached
    Expired,
}

impl ExecutionState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Expired)
    }

    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Idle, Sending)
                | (Idle, Failed)
                | (Sending, AwaitingResponse)
                | (Sending, RetryScheduled)
                | (Sending, Failed)
                | (Sending, Expired)
                | (AwaitingResponse, Succeeded)
                | (AwaitingResponse, RetryScheduled)
                | (AwaitingResponse, Failed)
                | (AwaitingResponse, Expired)
                | (RetryScheduled, Sending)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Sending => write!(f, "sending"),
            Self::AwaitingResponse => write!(f, "awaiting_response"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::RetryScheduled => write!(f, "retry_scheduled"),
            Self::Failed => write!(f, "failed"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Mutable progress of one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Current attempt, starting at 1
    pub iteration: u32,
    /// Total deadline fixed at command start
    pub deadline: Option<Instant>,
    /// Set once any attempt may have been applied without an answer; never cleared
    pub in_doubt: bool,
    pub aborted: bool,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            iteration: 1,
            deadline: None,
            in_doubt: false,
            aborted: false,
        }
    }
}

/// Per-attempt inputs handed to the command encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    pub iteration: u32,
    pub timeouts: RequestTimeouts,
    /// Instant the call of this attempt expires
    pub expires_at: Option<Instant>,
}

/// Summary of a finished command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub command_id: Uuid,
    pub kind: CommandKind,
    pub state: ExecutionState,
    /// Number of attempts made
    pub iteration: u32,
    pub in_doubt: bool,
    /// Node of the last attempt
    pub node: Option<String>,
    pub elapsed: Duration,
    /// Whether the caller observed success
    pub succeeded: bool,
}

enum AttemptFailure {
    Retryable(ClientError),
    Fatal(ClientError),
    /// The total deadline was reached
    DeadlineReached,
}

/// Per-command state machine
pub struct CommandExecution {
    id: Uuid,
    command: Command,
    policy: Arc<Policy>,
    engine: Arc<EngineContext>,
    context: ExecutionContext,
    budget: Budget,
    state: ExecutionState,
    node: Option<Arc<Node>>,
}

impl CommandExecution {
    pub fn new(command: Command, policy: Arc<Policy>, engine: Arc<EngineContext>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
            policy,
            engine,
            context: ExecutionContext::default(),
            budget: Budget {
                deadline: None,
                attempt_timeout: None,
            },
            state: ExecutionState::Idle,
            node: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Run on its own task
    pub fn spawn(self) -> JoinHandle<ExecutionReport> {
        tokio::spawn(self.run())
    }

    /// Execute until the outcome has been delivered
    pub async fn run(mut self) -> ExecutionReport {
        let started = Instant::now();
        self.budget = compute_budget(&self.policy, started);
        self.context.deadline = self.budget.deadline;
        self.engine.metrics.record_command();

        if let Err(problem) = self.policy.validate() {
            warn!(
                command_id = %self.id,
                kind = %self.command.kind(),
                "❌ Rejecting command: {problem}"
            );
            self.transition(ExecutionState::Failed);
            let error = ClientError::new(
                ErrorKind::Client,
                ResultCode::PARAMETER_ERROR,
                format!("invalid policy: {problem}"),
            );
            return self.finish(Err(error), started);
        }

        let outcome = loop {
            self.transition(ExecutionState::Sending);

            match self.attempt().await {
                Ok(decoded) => {
                    self.transition(ExecutionState::Succeeded);
                    break Ok(decoded);
                }
                Err(AttemptFailure::Fatal(error)) => {
                    self.transition(ExecutionState::Failed);
                    break Err(error);
                }
                Err(AttemptFailure::DeadlineReached) => {
                    self.transition(ExecutionState::Expired);
                    self.context.aborted = true;
                    break Err(ClientError::timeout(format!(
                        "total timeout of {}ms exceeded",
                        self.policy.total_timeout_ms
                    )));
                }
                Err(AttemptFailure::Retryable(error)) => {
                    let sleep = self.policy.sleep_between_retries();

                    if self.context.iteration > self.policy.max_retries {
                        self.transition(ExecutionState::Failed);
                        break Err(error.mark_retries_exhausted());
                    }

                    if !self.budget.allows_retry(Instant::now(), sleep) {
                        self.transition(ExecutionState::Failed);
                        break Err(ClientError::timeout(format!(
                            "total timeout of {}ms leaves no room for another attempt: {}",
                            self.policy.total_timeout_ms,
                            error.message()
                        )));
                    }

                    self.transition(ExecutionState::RetryScheduled);
                    self.engine.metrics.record_retry();
                    debug!(
                        command_id = %self.id,
                        kind = %self.command.kind(),
                        iteration = self.context.iteration,
                        sleep_ms = sleep.as_millis() as u64,
                        error = %error,
                        "🔄 Scheduling retry"
                    );

                    if !sleep.is_zero() {
                        tokio::time::sleep(sleep).await;
                    }
                    self.context.iteration += 1;
                }
            }
        };

        self.finish(outcome, started)
    }

    async fn attempt(&mut self) -> Result<DecodedResponse, AttemptFailure> {
        let now = Instant::now();
        if self.budget.is_expired(now) {
            return Err(AttemptFailure::DeadlineReached);
        }

        let node = self
            .command
            .route(self.engine.router.as_ref())
            .map_err(routing_failure)?;
        self.node = Some(Arc::clone(&node));

        let fallback = self
            .engine
            .transport
            .binding()
            .requires_call_expiry()
            .then_some(self.engine.fallback_call_timeout);
        let attempt = AttemptContext {
            iteration: self.context.iteration,
            timeouts: RequestTimeouts {
                total_ms: self.policy.total_timeout_ms,
                socket_ms: self.policy.socket_timeout_ms,
            },
            expires_at: self.budget.attempt_expiry(now, fallback),
        };

        let payload = self
            .command
            .encode(self.engine.codec.as_ref(), &attempt)
            .map_err(AttemptFailure::Fatal)?;

        let kind = self.command.kind();
        let (observer, mut events) = mpsc::unbounded_channel();
        let call = Arc::new(StreamingCall::new(
            kind.method(),
            payload,
            kind.response_shape(),
            attempt.expires_at,
            attempt.iteration,
            Box::new(observer),
        ));
        self.engine.tracker.register(&call);
        self.engine.metrics.record_attempt();

        debug!(
            command_id = %self.id,
            call_id = %call.id(),
            kind = %kind,
            node = %node.name,
            iteration = attempt.iteration,
            "📤 Sending attempt"
        );

        self.transition(ExecutionState::AwaitingResponse);
        let result = self
            .await_response(kind, node, &call, &mut events, attempt.expires_at)
            .await;
        self.engine.tracker.deregister(&call.id());
        result
    }

    async fn await_response(
        &mut self,
        kind: CommandKind,
        node: Arc<Node>,
        call: &Arc<StreamingCall>,
        events: &mut mpsc::UnboundedReceiver<CallEvent>,
        expires_at: Option<Instant>,
    ) -> Result<DecodedResponse, AttemptFailure> {
        let dispatch = self.engine.transport.dispatch(node, Arc::clone(call));
        let dispatched = match expires_at {
            Some(at) => tokio::time::timeout_at(at, dispatch).await.ok(),
            None => Some(dispatch.await),
        };

        let mut expires_at = expires_at;
        match dispatched {
            Some(Ok(())) => {}
            Some(Err(failure)) => {
                call.mark_aborted();
                return Err(self.classify(&failure));
            }
            // The transport was still holding the call when it expired.
            None => {
                if call.mark_aborted() {
                    return Err(self.attempt_expired());
                }
                expires_at = None;
            }
        }

        let mut frames = Vec::new();
        loop {
            let event = match expires_at {
                Some(at) => match tokio::time::timeout_at(at, events.recv()).await {
                    Ok(event) => event,
                    Err(_) => {
                        if call.mark_aborted() {
                            return Err(self.attempt_expired());
                        }
                        // Terminated concurrently; its last events are already queued.
                        expires_at = None;
                        continue;
                    }
                },
                None => events.recv().await,
            };

            match event {
                Some(CallEvent::Frame(frame)) => {
                    self.context.in_doubt |= frame.in_doubt;
                    frames.push(frame);
                }
                Some(CallEvent::Completed) => break,
                Some(CallEvent::Failed(TransportFailure::ResultCode(ResultCode::TIMEOUT)))
                    if call.has_expired() =>
                {
                    // Expiry sweep got there first.
                    return Err(self.attempt_expired());
                }
                Some(CallEvent::Failed(failure)) => return Err(self.classify(&failure)),
                None => {
                    return Err(AttemptFailure::Fatal(ClientError::client(
                        "call released without a terminal response",
                    )))
                }
            }
        }

        let decoded = self
            .engine
            .codec
            .decode(kind, &frames)
            .map_err(|e| AttemptFailure::Fatal(e.into()))?;
        self.context.in_doubt |= decoded.in_doubt;
        Ok(decoded)
    }

    fn classify(&mut self, failure: &TransportFailure) -> AttemptFailure {
        let classification = self.engine.classifier.classify(failure);
        self.context.in_doubt |= classification.in_doubt;

        debug!(
            command_id = %self.id,
            iteration = self.context.iteration,
            kind = ?classification.kind,
            retryable = classification.retryable,
            in_doubt = classification.in_doubt,
            "Attempt failed: {failure}"
        );

        let error = classification.to_error();
        if classification.retryable {
            AttemptFailure::Retryable(error)
        } else {
            AttemptFailure::Fatal(error)
        }
    }

    /// The call of the current attempt expired without a terminal response
    fn attempt_expired(&mut self) -> AttemptFailure {
        // The request went out, so it may have been applied.
        self.context.in_doubt = true;

        if self.budget.is_expired(Instant::now()) {
            return AttemptFailure::DeadlineReached;
        }

        let mut error = ClientError::new(
            ErrorKind::Timeout,
            ResultCode::TIMEOUT,
            format!(
                "socket timeout of {}ms elapsed",
                self.budget
                    .attempt_timeout
                    .unwrap_or(self.engine.fallback_call_timeout)
                    .as_millis()
            ),
        );
        error.set_in_doubt(true);
        AttemptFailure::Retryable(error)
    }

    fn transition(&mut self, next: ExecutionState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                command_id = %self.id,
                from = %self.state,
                to = %next,
                "Rejected invalid execution state transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    fn finish(
        self,
        outcome: Result<DecodedResponse, ClientError>,
        started: Instant,
    ) -> ExecutionReport {
        let CommandExecution {
            id,
            command,
            policy,
            engine,
            context,
            state,
            node,
            ..
        } = self;

        let kind = command.kind();
        let node_name = node.as_ref().map(|node| node.name.clone());
        let failure = outcome.as_ref().err().cloned();
        let annotation = Annotation {
            iteration: context.iteration,
            in_doubt: context.in_doubt,
            policy: Some(Arc::clone(&policy)),
            node: node_name.clone(),
        };

        let succeeded = command.settle(outcome, &policy, &annotation);

        let timed_out = failure.as_ref().is_some_and(ClientError::is_timeout);
        if succeeded {
            engine.metrics.record_success();
        } else {
            engine.metrics.record_failure(timed_out);
        }

        if let Some(error) = &failure {
            if timed_out || error.retries_exhausted() {
                warn!(
                    command_id = %id,
                    kind = %kind,
                    iteration = context.iteration,
                    in_doubt = context.in_doubt,
                    error = %error,
                    "⏰ Command gave up"
                );
            }
        }

        let elapsed = started.elapsed();
        let details = failure.as_ref().map(ToString::to_string);
        log_command_operation(
            kind.as_str(),
            id,
            node_name.as_deref(),
            &state.to_string(),
            context.iteration,
            context.in_doubt,
            elapsed.as_millis() as u64,
            details.as_deref(),
        );

        ExecutionReport {
            command_id: id,
            kind,
            state,
            iteration: context.iteration,
            in_doubt: context.in_doubt,
            node: node_name,
            elapsed,
            succeeded,
        }
    }
}

fn routing_failure(error: ClientError) -> AttemptFailure {
    if error.kind() == ErrorKind::ServerUnavailable {
        AttemptFailure::Retryable(error)
    } else {
        AttemptFailure::Fatal(error)
    }
}
