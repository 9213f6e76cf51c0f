//! Transport Layer Abstraction
//!
//! The engine never touches sockets. A [`Transport`] accepts a prepared
//! [`StreamingCall`] for a node and resolves it later through
//! [`StreamingCall::on_next`] / [`StreamingCall::on_error`]. Both the native binary
//! protocol and the proxied path plug in here; the only difference the engine
//! observes is [`TransportBinding`], which decides whether every call must carry an
//! expiry.

use crate::execution::call::StreamingCall;
use crate::execution::classifier::{IoErrorKind, TransportFailure};
use crate::routing::Node;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Transport binding enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportBinding {
    /// Native binary protocol straight to the node
    Native,
    /// Streaming RPC through a proxy; every call must carry an expiry
    Proxy,
}

impl TransportBinding {
    pub fn requires_call_expiry(self) -> bool {
        matches!(self, TransportBinding::Proxy)
    }
}

/// Generic transport trait shared by both bindings
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Hand `call` to the binding. An `Err` means the call was never sent; failures
    /// after that point are reported through the call itself.
    async fn dispatch(&self, node: Arc<Node>, call: Arc<StreamingCall>)
        -> Result<(), TransportFailure>;

    fn binding(&self) -> TransportBinding;
}

/// Call queued by a [`ChannelTransport`]
#[derive(Debug)]
pub struct DispatchedCall {
    pub node: Arc<Node>,
    pub call: Arc<StreamingCall>,
}

/// Transport that queues calls on a channel for an external driver to resolve
///
/// Useful for embedding the engine in front of a connection layer that runs its own
/// event loop, and for driving the engine by hand in tests.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    binding: TransportBinding,
    sender: mpsc::Sender<DispatchedCall>,
}

impl ChannelTransport {
    pub fn new(binding: TransportBinding, queue_size: usize) -> (Self, mpsc::Receiver<DispatchedCall>) {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        (Self { binding, sender }, receiver)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn dispatch(
        &self,
        node: Arc<Node>,
        call: Arc<StreamingCall>,
    ) -> Result<(), TransportFailure> {
        debug!(
            call_id = %call.id(),
            node = %node.name,
            method = call.method().path(),
            "Queueing call for dispatch"
        );

        self.sender
            .send(DispatchedCall { node, call })
            .await
            .map_err(|_| TransportFailure::io(IoErrorKind::ConnectionRefused, "dispatch queue closed"))
    }

    fn binding(&self) -> TransportBinding {
        self.binding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::call::{MethodId, ResponseFrame, ResponseShape};

    #[tokio::test]
    async fn test_channel_transport_queues_calls() {
        let (transport, mut receiver) = ChannelTransport::new(TransportBinding::Native, 4);
        let (tx, mut events) = mpsc::unbounded_channel();
        let call = Arc::new(StreamingCall::new(
            MethodId::Read,
            b"req".to_vec(),
            ResponseShape::Unary,
            None,
            1,
            Box::new(tx),
        ));

        transport
            .dispatch(Arc::new(Node::new("A", "a")), Arc::clone(&call))
            .await
            .unwrap();

        let dispatched = receiver.recv().await.unwrap();
        assert_eq!(dispatched.node.name, "A");
        assert_eq!(dispatched.call.payload(), b"req");

        dispatched.call.on_next(ResponseFrame::last(vec![7]));
        assert!(events.recv().await.is_some());
        assert!(call.has_completed());
    }

    #[tokio::test]
    async fn test_closed_queue_reports_refused_connection() {
        let (transport, receiver) = ChannelTransport::new(TransportBinding::Proxy, 1);
        drop(receiver);
        let (tx, _events) = mpsc::unbounded_channel();
        let call = Arc::new(StreamingCall::new(
            MethodId::Exists,
            Vec::new(),
            ResponseShape::Unary,
            None,
            1,
            Box::new(tx),
        ));

        let failure = transport
            .dispatch(Arc::new(Node::new("A", "a")), call)
            .await
            .unwrap_err();
        assert!(matches!(
            failure,
            TransportFailure::Io {
                kind: IoErrorKind::ConnectionRefused,
                ..
            }
        ));
        assert!(transport.binding().requires_call_expiry());
    }
}
