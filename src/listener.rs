//! # Command Listeners
//!
//! Callers learn the outcome of a command through a [`Listener`]. The engine wraps
//! the listener in a [`Completion`] that is consumed when resolved, so a command
//! can deliver at most one outcome.
//!
//! ## Callback failures
//!
//! A listener's `on_success` may itself fail. The failure is logged and redirected
//! to `on_failure` of the same listener as a client error; the listener is never
//! called again afterwards.
//!
//! ## Async form
//!
//! [`FutureListener`] forwards the outcome over a `tokio::sync::oneshot` channel,
//! which is how the `async fn` operations of [`AsyncClient`](crate::client::AsyncClient)
//! are built on top of the listener-style ones.
//!
//! ```rust
//! use kvs_core::listener::{Annotation, Completion, FutureListener};
//! use kvs_core::types::Key;
//!
//! # tokio_test::block_on(async {
//! let (listener, outcome) = FutureListener::<bool>::new();
//! Completion::<Key, bool>::new(listener)
//!     .resolve(Ok((Key::new("test", "users", 1), true)), &Annotation::default());
//!
//! assert!(outcome.outcome().await.unwrap());
//! # });
//! ```

use crate::error::{CallbackError, ClientError, Result};
use crate::logging::log_error;
use crate::policy::Policy;
use crate::types::{BatchRecord, Key, Record, Value};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::warn;

/// Caller supplied completion callbacks
pub trait Listener<K, T>: Send + 'static {
    fn on_success(&mut self, key: K, value: T) -> std::result::Result<(), CallbackError>;

    fn on_failure(&mut self, error: ClientError);
}

/// Receives whether a key exists
pub type ExistsListener = Box<dyn Listener<Key, bool>>;
/// Receives the record read for a key, `None` when absent and tolerated
pub type RecordListener = Box<dyn Listener<Key, Option<Record>>>;
/// Receives write acknowledgements
pub type WriteListener = Box<dyn Listener<Key, ()>>;
/// Receives the value returned by a user defined function
pub type ExecuteListener = Box<dyn Listener<Key, Option<Value>>>;
/// Receives every key of a batch together with its per-key outcome
pub type BatchListener = Box<dyn Listener<Vec<Key>, Vec<BatchRecord>>>;

impl<K: 'static, T: 'static> Listener<K, T> for Box<dyn Listener<K, T>> {
    fn on_success(&mut self, key: K, value: T) -> std::result::Result<(), CallbackError> {
        (**self).on_success(key, value)
    }

    fn on_failure(&mut self, error: ClientError) {
        (**self).on_failure(error)
    }
}

/// Context attached to every failure delivered to a listener
#[derive(Debug, Clone, Default)]
pub struct Annotation {
    /// Final attempt number
    pub iteration: u32,
    pub in_doubt: bool,
    pub policy: Option<Arc<Policy>>,
    /// Node of the final attempt
    pub node: Option<String>,
}

impl Annotation {
    pub fn apply(&self, mut error: ClientError) -> ClientError {
        if self.iteration > 0 {
            error.set_iteration(self.iteration);
        }
        error.set_in_doubt(self.in_doubt);
        if let Some(policy) = &self.policy {
            error.set_policy(Arc::clone(policy));
        }
        error.set_node(self.node.clone());
        error
    }
}

/// Single-use completion guard around a listener
pub struct Completion<K, T> {
    listener: Box<dyn Listener<K, T>>,
}

impl<K: 'static, T: 'static> Completion<K, T> {
    pub fn new(listener: impl Listener<K, T>) -> Self {
        Self {
            listener: Box::new(listener),
        }
    }

    /// Deliver the outcome. Failures are annotated before reaching `on_failure`.
    pub fn resolve(mut self, outcome: Result<(K, T)>, annotation: &Annotation) {
        match outcome {
            Ok((key, value)) => {
                if let Err(cause) = self.listener.on_success(key, value) {
                    log_error(
                        "listener",
                        "on_success",
                        &cause.to_string(),
                        Some("redirecting to on_failure"),
                    );
                    let failure = annotation.apply(ClientError::callback(cause));
                    self.listener.on_failure(failure);
                }
            }
            Err(failure) => self.listener.on_failure(annotation.apply(failure)),
        }
    }
}

/// Listener that forwards the outcome over a oneshot channel
pub struct FutureListener<T> {
    sender: Option<oneshot::Sender<Result<T>>>,
}

impl<T: Send + 'static> FutureListener<T> {
    pub fn new() -> (Self, ListenerFuture<T>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
            },
            ListenerFuture { receiver },
        )
    }

    fn send(&mut self, outcome: Result<T>) {
        match self.sender.take() {
            Some(sender) => {
                if sender.send(outcome).is_err() {
                    warn!("Command outcome dropped, the caller stopped waiting");
                }
            }
            None => warn!("Command outcome delivered twice, ignoring"),
        }
    }
}

impl<K: 'static, T: Send + 'static> Listener<K, T> for FutureListener<T> {
    fn on_success(&mut self, _key: K, value: T) -> std::result::Result<(), CallbackError> {
        self.send(Ok(value));
        Ok(())
    }

    fn on_failure(&mut self, error: ClientError) {
        self.send(Err(error));
    }
}

/// Receiving side of a [`FutureListener`]
pub struct ListenerFuture<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> ListenerFuture<T> {
    /// Wait for the command outcome
    pub async fn outcome(self) -> Result<T> {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(ClientError::client("command dropped before completing")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ResultCode;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Calls {
        successes: Vec<bool>,
        failures: Vec<ClientError>,
    }

    struct Probe {
        calls: Arc<Mutex<Calls>>,
        fail_success: bool,
    }

    impl Listener<Key, bool> for Probe {
        fn on_success(&mut self, _key: Key, value: bool) -> std::result::Result<(), CallbackError> {
            self.calls.lock().successes.push(value);
            if self.fail_success {
                return Err("listener rejected value".into());
            }
            Ok(())
        }

        fn on_failure(&mut self, error: ClientError) {
            self.calls.lock().failures.push(error);
        }
    }

    fn annotation() -> Annotation {
        Annotation {
            iteration: 3,
            in_doubt: true,
            policy: Some(Arc::new(Policy::default())),
            node: Some("A".to_string()),
        }
    }

    #[test]
    fn test_failure_is_annotated() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let completion = Completion::new(Probe {
            calls: Arc::clone(&calls),
            fail_success: false,
        });

        completion.resolve(
            Err(ClientError::result_code(ResultCode::KEY_BUSY)),
            &annotation(),
        );

        let calls = calls.lock();
        assert_eq!(calls.failures.len(), 1);
        let failure = &calls.failures[0];
        assert_eq!(failure.iteration(), 3);
        assert!(failure.in_doubt());
        assert_eq!(failure.node(), Some("A"));
        assert!(failure.policy().is_some());
    }

    #[test]
    fn test_callback_failure_redirects_once() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let completion = Completion::new(Probe {
            calls: Arc::clone(&calls),
            fail_success: true,
        });

        completion.resolve(Ok((Key::new("test", "s", 1), true)), &annotation());

        let calls = calls.lock();
        assert_eq!(calls.successes, vec![true]);
        assert_eq!(calls.failures.len(), 1);
        assert!(calls.failures[0].message().contains("listener rejected value"));
    }

    #[tokio::test]
    async fn test_future_listener_delivers_value() {
        let (listener, future) = FutureListener::<bool>::new();
        Completion::<Key, bool>::new(listener)
            .resolve(Ok((Key::new("test", "s", 1), true)), &Annotation::default());

        assert!(future.outcome().await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_listener_resolves_future_with_error() {
        let (listener, future) = FutureListener::<bool>::new();
        drop(listener);

        let error = future.outcome().await.unwrap_err();
        assert_eq!(error.code(), ResultCode::CLIENT_ERROR);
    }
}
