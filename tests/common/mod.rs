//! # Test Fixtures
//!
//! Shared helpers for the engine integration tests:
//!
//! - [`ScriptedTransport`] answers every dispatched call from a script of
//!   [`Reply`] values, falling back to a responder once the script runs out, and
//!   records what it was sent
//! - [`Probe`] is a listener that records every outcome it is given
//! - router and key builders

#![allow(dead_code)]

use async_trait::async_trait;
use kvs_core::codec::{BatchItem, DecodedResponse, JsonCodec};
use kvs_core::execution::{
    IoErrorKind, ResponseFrame, StatusCode, StreamingCall, Transport, TransportBinding,
    TransportFailure,
};
use kvs_core::routing::{Node, StaticRouter};
use kvs_core::{
    AsyncClient, CallbackError, ClientError, EngineConfig, Key, Listener, Record, ResultCode,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Scripted answer to one dispatched call
#[derive(Debug, Clone)]
pub enum Reply {
    /// Complete the call with one final frame
    Respond(DecodedResponse),
    /// Deliver these frames in order
    Frames(Vec<ResponseFrame>),
    /// Fail the call with a remote status
    Status(StatusCode),
    /// Fail the call with a socket error
    Io(IoErrorKind),
    /// Reject the dispatch itself
    Refuse,
    /// Accept the call and never answer
    Hang,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Respond(DecodedResponse::with_code(ResultCode::OK))
    }

    pub fn code(code: ResultCode) -> Self {
        Reply::Respond(DecodedResponse::with_code(code))
    }

    pub fn record(bins: &[(&str, serde_json::Value)]) -> Self {
        Reply::Respond(DecodedResponse::with_record(record(bins)))
    }
}

/// Request as decoded from the payload of a dispatched call
#[derive(Debug, Clone, Deserialize)]
pub struct SentRequest {
    pub kind: String,
    pub keys: Vec<Key>,
    #[serde(default)]
    pub namespace: Option<String>,
    pub iteration: u32,
}

/// What the transport saw for one dispatch
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub node: String,
    pub request: SentRequest,
    pub expires_at: Option<Instant>,
    pub dispatched_at: Instant,
}

pub type Responder = Arc<dyn Fn(&Node, &SentRequest) -> Reply + Send + Sync>;

/// Transport that answers calls from a script
pub struct ScriptedTransport {
    binding: TransportBinding,
    script: Mutex<VecDeque<Reply>>,
    responder: Responder,
    dispatches: Mutex<Vec<Dispatch>>,
    calls: Mutex<Vec<Arc<StreamingCall>>>,
}

impl ScriptedTransport {
    /// Transport that answers OK once `script` is exhausted
    pub fn new(binding: TransportBinding, script: Vec<Reply>) -> Self {
        Self::with_responder(
            binding,
            script,
            Arc::new(|_: &Node, _: &SentRequest| Reply::ok()),
        )
    }

    /// Transport that answers every call with `reply`
    pub fn always(binding: TransportBinding, reply: Reply) -> Self {
        Self::with_responder(
            binding,
            Vec::new(),
            Arc::new(move |_: &Node, _: &SentRequest| reply.clone()),
        )
    }

    pub fn with_responder(
        binding: TransportBinding,
        script: Vec<Reply>,
        responder: Responder,
    ) -> Self {
        Self {
            binding,
            script: Mutex::new(script.into()),
            responder,
            dispatches: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> usize {
        self.dispatches.lock().len()
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.dispatches.lock().clone()
    }

    pub fn calls(&self) -> Vec<Arc<StreamingCall>> {
        self.calls.lock().clone()
    }
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("binding", &self.binding)
            .field("attempts", &self.attempts())
            .finish()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn dispatch(
        &self,
        node: Arc<Node>,
        call: Arc<StreamingCall>,
    ) -> Result<(), TransportFailure> {
        let request: SentRequest = serde_json::from_slice(call.payload())
            .map_err(|e| TransportFailure::io(IoErrorKind::Other, e.to_string()))?;

        let scripted = self.script.lock().pop_front();
        let reply = scripted.unwrap_or_else(|| (self.responder)(&node, &request));

        self.dispatches.lock().push(Dispatch {
            node: node.name.clone(),
            request,
            expires_at: call.expires_at(),
            dispatched_at: Instant::now(),
        });
        self.calls.lock().push(Arc::clone(&call));

        match reply {
            Reply::Respond(response) => {
                let frame = JsonCodec::response_frame(&response)
                    .map_err(|e| TransportFailure::io(IoErrorKind::Other, e.to_string()))?;
                call.on_next(frame);
            }
            Reply::Frames(frames) => {
                for frame in frames {
                    call.on_next(frame);
                }
            }
            Reply::Status(code) => {
                call.on_error(TransportFailure::status(code, "scripted status"));
            }
            Reply::Io(kind) => {
                call.on_error(TransportFailure::io(kind, "scripted io failure"));
            }
            Reply::Refuse => {
                return Err(TransportFailure::io(
                    IoErrorKind::ConnectionRefused,
                    "scripted refusal",
                ))
            }
            Reply::Hang => {}
        }
        Ok(())
    }

    fn binding(&self) -> TransportBinding {
        self.binding
    }
}

/// Batch responder: every key OK with a `value` bin, except the keys listed in
/// `codes`, which get the given result code
pub fn batch_responder(codes: HashMap<Key, ResultCode>) -> Responder {
    Arc::new(move |_: &Node, request: &SentRequest| {
        let items = request
            .keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                let code = codes.get(key).copied().unwrap_or(ResultCode::OK);
                let value = serde_json::json!(key.user_key.to_string());
                BatchItem {
                    index,
                    result_code: code,
                    record: code.is_ok().then(|| record(&[("value", value)])),
                    in_doubt: false,
                }
            })
            .collect();
        Reply::Respond(DecodedResponse::with_items(items))
    })
}

pub fn record(bins: &[(&str, serde_json::Value)]) -> Record {
    Record {
        bins: bins
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect(),
        generation: 1,
        expiration: 0,
    }
}

pub fn key(user_key: i64) -> Key {
    Key::new("test", "users", user_key)
}

pub fn single_node_router() -> StaticRouter {
    StaticRouter::new(vec![Node::new("A", "10.0.0.1:3000")])
}

pub fn three_node_router() -> StaticRouter {
    StaticRouter::new(vec![
        Node::new("A", "10.0.0.1:3000"),
        Node::new("B", "10.0.0.2:3000"),
        Node::new("C", "10.0.0.3:3000"),
    ])
}

/// Client over `transport` and a single node
pub fn client(transport: &Arc<ScriptedTransport>) -> AsyncClient {
    client_with(transport, single_node_router(), EngineConfig::default())
}

pub fn client_with(
    transport: &Arc<ScriptedTransport>,
    router: StaticRouter,
    config: EngineConfig,
) -> AsyncClient {
    let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
    AsyncClient::new(transport, Arc::new(router), &config)
}

/// Outcomes recorded by a [`Probe`]
pub struct Outcomes<T>(Arc<Mutex<Vec<Result<T, ClientError>>>>);

impl<T> Clone for Outcomes<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone> Outcomes<T> {
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn all(&self) -> Vec<Result<T, ClientError>> {
        self.0.lock().clone()
    }

    /// The only recorded outcome; panics unless exactly one was recorded
    pub fn single(&self) -> Result<T, ClientError> {
        let outcomes = self.0.lock();
        assert_eq!(outcomes.len(), 1, "expected exactly one outcome");
        outcomes[0].clone()
    }
}

/// Listener that records every outcome it receives
pub struct Probe<T> {
    outcomes: Arc<Mutex<Vec<Result<T, ClientError>>>>,
    reject_success: bool,
}

impl<T> Probe<T> {
    pub fn new() -> (Self, Outcomes<T>) {
        Self::build(false)
    }

    /// Probe whose success callback fails after recording the value
    pub fn rejecting() -> (Self, Outcomes<T>) {
        Self::build(true)
    }

    fn build(reject_success: bool) -> (Self, Outcomes<T>) {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                outcomes: Arc::clone(&outcomes),
                reject_success,
            },
            Outcomes(outcomes),
        )
    }
}

impl<K: 'static, T: Send + 'static> Listener<K, T> for Probe<T> {
    fn on_success(&mut self, _key: K, value: T) -> Result<(), CallbackError> {
        self.outcomes.lock().push(Ok(value));
        if self.reject_success {
            return Err("probe rejected the value".into());
        }
        Ok(())
    }

    fn on_failure(&mut self, error: ClientError) {
        self.outcomes.lock().push(Err(error));
    }
}
