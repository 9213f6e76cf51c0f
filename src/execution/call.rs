//! # Streaming Call Lifecycle
//!
//! A [`StreamingCall`] wraps exactly one request/response exchange handed to a
//! transport. The transport resolves it through [`StreamingCall::on_next`] and
//! [`StreamingCall::on_error`]; the owning command aborts it on expiry with
//! [`StreamingCall::mark_aborted`].
//!
//! ## Terminal state
//!
//! A call is `Active` until it reaches `Completed` or `Aborted`, exactly once. The
//! response observer lives inside the call and is taken out on the terminal
//! transition, so once a call is terminal nothing can reach the observer again:
//! late frames, duplicate errors and repeated sweeps are no-ops.
//!
//! ```text
//!             on_next(has_next = false)
//!   Active ────────────────────────────▶ Completed
//!     │
//!     │ on_error / mark_aborted / fail_if_not_complete
//!     ▼
//!   Aborted
//! ```

use crate::constants::ResultCode;
use crate::execution::classifier::TransportFailure;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Remote method a call is issued against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodId {
    Read,
    Write,
    Exists,
    Execute,
    BatchOperate,
}

impl MethodId {
    /// Fully qualified streaming method name used by the proxy binding
    pub fn path(self) -> &'static str {
        match self {
            MethodId::Read => "kvs.KVS/ReadStreaming",
            MethodId::Write => "kvs.KVS/PutStreaming",
            MethodId::Exists => "kvs.KVS/ExistsStreaming",
            MethodId::Execute => "kvs.KVS/ExecuteStreaming",
            MethodId::BatchOperate => "kvs.KVS/BatchOperateStreaming",
        }
    }
}

/// Shape of the response stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// The first frame completes the call
    Unary,
    /// Frames flag whether more follow; the call completes on the last one
    Streaming,
}

/// One response frame delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub payload: Vec<u8>,
    /// More frames follow this one
    pub has_next: bool,
    /// The server could not tell whether the request was applied
    pub in_doubt: bool,
}

impl ResponseFrame {
    /// Final frame of a response
    pub fn last(payload: Vec<u8>) -> Self {
        Self {
            payload,
            has_next: false,
            in_doubt: false,
        }
    }

    /// Intermediate frame of a streaming response
    pub fn partial(payload: Vec<u8>) -> Self {
        Self {
            payload,
            has_next: true,
            in_doubt: false,
        }
    }

    pub fn with_in_doubt(mut self, in_doubt: bool) -> Self {
        self.in_doubt = in_doubt;
        self
    }
}

/// Event forwarded to a channel-backed observer
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    Frame(ResponseFrame),
    Completed,
    Failed(TransportFailure),
}

/// Downstream consumer of a call's responses
pub trait ResponseObserver: Send {
    fn on_next(&mut self, frame: ResponseFrame);

    /// Terminal failure; never followed by another notification
    fn on_error(&mut self, failure: TransportFailure);

    /// Terminal success; never followed by another notification
    fn on_completed(&mut self);
}

impl ResponseObserver for mpsc::UnboundedSender<CallEvent> {
    fn on_next(&mut self, frame: ResponseFrame) {
        // A closed receiver means the command already gave up on this call.
        let _ = self.send(CallEvent::Frame(frame));
    }

    fn on_error(&mut self, failure: TransportFailure) {
        let _ = self.send(CallEvent::Failed(failure));
    }

    fn on_completed(&mut self) {
        let _ = self.send(CallEvent::Completed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallState {
    Active = 0,
    Completed = 1,
    Aborted = 2,
}

impl From<u8> for CallState {
    fn from(value: u8) -> Self {
        match value {
            0 => CallState::Active,
            1 => CallState::Completed,
            _ => CallState::Aborted,
        }
    }
}

/// One request/response exchange in flight
pub struct StreamingCall {
    id: Uuid,
    method: MethodId,
    payload: Vec<u8>,
    shape: ResponseShape,
    expires_at: Option<Instant>,
    iteration: u32,
    state: AtomicU8,
    observer: Mutex<Option<Box<dyn ResponseObserver>>>,
}

impl StreamingCall {
    pub fn new(
        method: MethodId,
        payload: Vec<u8>,
        shape: ResponseShape,
        expires_at: Option<Instant>,
        iteration: u32,
        observer: Box<dyn ResponseObserver>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            payload,
            shape,
            expires_at,
            iteration,
            state: AtomicU8::new(CallState::Active as u8),
            observer: Mutex::new(Some(observer)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Serialized request bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    /// Attempt number this call was issued for
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn state(&self) -> CallState {
        CallState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether the call reached a terminal state, successfully or not
    pub fn has_completed(&self) -> bool {
        self.state() != CallState::Active
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == CallState::Aborted
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn has_expiry(&self) -> bool {
        self.expires_at.is_some()
    }

    pub fn has_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    /// Time left before expiry, `None` when the call never expires
    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()))
    }

    /// Deliver a response frame. Returns `false` when the frame was dropped because
    /// the call is already terminal.
    pub fn on_next(&self, frame: ResponseFrame) -> bool {
        let mut observer = self.observer.lock();
        let Some(active) = observer.as_mut() else {
            return false;
        };

        let last = !frame.has_next || self.shape == ResponseShape::Unary;
        active.on_next(frame);

        if last && self.transition(CallState::Completed) {
            if let Some(mut finished) = observer.take() {
                finished.on_completed();
            }
        }
        true
    }

    /// Fail the call. Returns `false` when the call was already terminal.
    pub fn on_error(&self, failure: TransportFailure) -> bool {
        let mut observer = self.observer.lock();
        if !self.transition(CallState::Aborted) {
            return false;
        }
        if let Some(mut finished) = observer.take() {
            finished.on_error(failure);
        }
        true
    }

    /// Fail the call with `code` unless it already completed
    pub fn fail_if_not_complete(&self, code: ResultCode) -> bool {
        if self.has_completed() {
            return false;
        }
        self.on_error(TransportFailure::ResultCode(code))
    }

    /// Abort without notifying the observer; used when the owner stopped waiting
    pub fn mark_aborted(&self) -> bool {
        let mut observer = self.observer.lock();
        if !self.transition(CallState::Aborted) {
            return false;
        }
        observer.take();
        true
    }

    fn transition(&self, to: CallState) -> bool {
        self.state
            .compare_exchange(
                CallState::Active as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl fmt::Debug for StreamingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingCall")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("shape", &self.shape)
            .field("iteration", &self.iteration)
            .field("state", &self.state())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
