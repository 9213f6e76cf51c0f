//! # Async Client
//!
//! Public entry point of the engine. An [`AsyncClient`] wires a transport and a
//! router to the shared [`EngineContext`], starts the in-flight call sweeper and
//! offers every operation in two forms:
//!
//! - **listener style**: the outcome is delivered to a caller supplied
//!   [`Listener`]; the call returns the [`JoinHandle`] of the execution task
//! - **future style**: `async fn` variants built on [`FutureListener`]
//!
//! Operations that take an `Option<&Policy>` fall back to the configured default
//! policy when `None` is passed.
//!
//! ```rust,no_run
//! use kvs_core::client::AsyncClient;
//! use kvs_core::config::EngineConfig;
//! use kvs_core::execution::{ChannelTransport, TransportBinding};
//! use kvs_core::routing::{Node, StaticRouter};
//! use kvs_core::types::Key;
//! use std::sync::Arc;
//!
//! # async fn example() -> kvs_core::Result<()> {
//! let (transport, _calls) = ChannelTransport::new(TransportBinding::Proxy, 64);
//! let router = StaticRouter::new(vec![Node::new("A", "10.0.0.1:3000")]);
//! let client = AsyncClient::new(Arc::new(transport), Arc::new(router), &EngineConfig::default());
//!
//! let found = client.exists_async(None, Key::new("test", "users", 1)).await?;
//! # Ok(())
//! # }
//! ```

use crate::codec::Codec;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::execution::batch::{execute_batch, BatchKind};
use crate::execution::classifier::ErrorClassifier;
use crate::execution::command::{Command, NotFound};
use crate::execution::executor::{CommandExecution, EngineContext, ExecutionReport};
use crate::execution::metrics::MetricsSnapshot;
use crate::execution::transport::Transport;
use crate::listener::{FutureListener, Listener};
use crate::policy::{BatchPolicy, Policy};
use crate::routing::Router;
use crate::types::{BatchRecord, Bin, Key, Record, UdfCall, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Handles of the sub-batch executions spawned by a batch operation
pub type BatchHandles = Vec<JoinHandle<ExecutionReport>>;

/// Asynchronous database client
#[derive(Debug)]
pub struct AsyncClient {
    engine: Arc<EngineContext>,
    default_policy: Arc<Policy>,
    batch_policy: BatchPolicy,
    sweeper: JoinHandle<()>,
}

impl AsyncClient {
    /// Client with the default codec and classifier. Must be called inside a tokio
    /// runtime because it starts the call sweeper.
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<dyn Router>,
        config: &EngineConfig,
    ) -> Self {
        Self::builder(transport, router).config(config.clone()).build()
    }

    pub fn builder(transport: Arc<dyn Transport>, router: Arc<dyn Router>) -> AsyncClientBuilder {
        AsyncClientBuilder {
            transport,
            router,
            codec: None,
            classifier: None,
            config: EngineConfig::default(),
        }
    }

    pub fn engine(&self) -> &Arc<EngineContext> {
        &self.engine
    }

    pub fn default_policy(&self) -> &Policy {
        &self.default_policy
    }

    pub fn batch_policy(&self) -> &BatchPolicy {
        &self.batch_policy
    }

    /// Current execution counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.engine.metrics.snapshot()
    }

    /// Number of calls currently awaiting a response
    pub fn in_flight_calls(&self) -> usize {
        self.engine.tracker.len()
    }

    fn policy(&self, policy: Option<&Policy>) -> Arc<Policy> {
        match policy {
            Some(policy) => Arc::new(policy.clone()),
            None => Arc::clone(&self.default_policy),
        }
    }

    fn spawn(&self, command: Command, policy: Option<&Policy>) -> JoinHandle<ExecutionReport> {
        CommandExecution::new(command, self.policy(policy), Arc::clone(&self.engine)).spawn()
    }

    // ---------------------------------------------------------------------
    // Listener style
    // ---------------------------------------------------------------------

    /// Read a record; a missing record is delivered as `None`
    pub fn get(
        &self,
        policy: Option<&Policy>,
        key: Key,
        bin_names: Option<Vec<String>>,
        listener: impl Listener<Key, Option<Record>>,
    ) -> JoinHandle<ExecutionReport> {
        self.spawn(
            Command::read(key, bin_names, NotFound::ReturnNone, listener),
            policy,
        )
    }

    /// Read a record; a missing record fails with KEY_NOT_FOUND_ERROR
    pub fn get_required(
        &self,
        policy: Option<&Policy>,
        key: Key,
        bin_names: Option<Vec<String>>,
        listener: impl Listener<Key, Option<Record>>,
    ) -> JoinHandle<ExecutionReport> {
        self.spawn(
            Command::read(key, bin_names, NotFound::Error, listener),
            policy,
        )
    }

    pub fn put(
        &self,
        policy: Option<&Policy>,
        key: Key,
        bins: Vec<Bin>,
        listener: impl Listener<Key, ()>,
    ) -> JoinHandle<ExecutionReport> {
        self.spawn(Command::write(key, bins, listener), policy)
    }

    pub fn exists(
        &self,
        policy: Option<&Policy>,
        key: Key,
        listener: impl Listener<Key, bool>,
    ) -> JoinHandle<ExecutionReport> {
        self.spawn(Command::exists(key, listener), policy)
    }

    /// Invoke a user defined function on the record of `key`
    pub fn execute(
        &self,
        policy: Option<&Policy>,
        key: Key,
        udf: UdfCall,
        listener: impl Listener<Key, Option<Value>>,
    ) -> JoinHandle<ExecutionReport> {
        self.spawn(Command::execute(key, udf, listener), policy)
    }

    /// Read many records; the listener receives one [`BatchRecord`] per key, in key
    /// order
    pub fn get_batch(
        &self,
        policy: Option<&BatchPolicy>,
        keys: Vec<Key>,
        bin_names: Option<Vec<String>>,
        listener: impl Listener<Vec<Key>, Vec<BatchRecord>>,
    ) -> BatchHandles {
        let kind = BatchKind::Read {
            bin_names: bin_names.map(Into::into),
        };
        self.spawn_batch(policy, kind, keys, listener)
    }

    pub fn exists_batch(
        &self,
        policy: Option<&BatchPolicy>,
        keys: Vec<Key>,
        listener: impl Listener<Vec<Key>, Vec<BatchRecord>>,
    ) -> BatchHandles {
        self.spawn_batch(policy, BatchKind::Exists, keys, listener)
    }

    fn spawn_batch(
        &self,
        policy: Option<&BatchPolicy>,
        kind: BatchKind,
        keys: Vec<Key>,
        listener: impl Listener<Vec<Key>, Vec<BatchRecord>>,
    ) -> BatchHandles {
        let policy = policy.unwrap_or(&self.batch_policy);
        execute_batch(&self.engine, policy, kind, keys, Box::new(listener))
    }

    // ---------------------------------------------------------------------
    // Future style
    // ---------------------------------------------------------------------

    pub async fn get_async(
        &self,
        policy: Option<&Policy>,
        key: Key,
        bin_names: Option<Vec<String>>,
    ) -> Result<Option<Record>> {
        let (listener, outcome) = FutureListener::new();
        self.get(policy, key, bin_names, listener);
        outcome.outcome().await
    }

    pub async fn get_required_async(
        &self,
        policy: Option<&Policy>,
        key: Key,
        bin_names: Option<Vec<String>>,
    ) -> Result<Option<Record>> {
        let (listener, outcome) = FutureListener::new();
        self.get_required(policy, key, bin_names, listener);
        outcome.outcome().await
    }

    pub async fn put_async(&self, policy: Option<&Policy>, key: Key, bins: Vec<Bin>) -> Result<()> {
        let (listener, outcome) = FutureListener::new();
        self.put(policy, key, bins, listener);
        outcome.outcome().await
    }

    pub async fn exists_async(&self, policy: Option<&Policy>, key: Key) -> Result<bool> {
        let (listener, outcome) = FutureListener::new();
        self.exists(policy, key, listener);
        outcome.outcome().await
    }

    pub async fn execute_async(
        &self,
        policy: Option<&Policy>,
        key: Key,
        udf: UdfCall,
    ) -> Result<Option<Value>> {
        let (listener, outcome) = FutureListener::new();
        self.execute(policy, key, udf, listener);
        outcome.outcome().await
    }

    pub async fn get_batch_async(
        &self,
        policy: Option<&BatchPolicy>,
        keys: Vec<Key>,
        bin_names: Option<Vec<String>>,
    ) -> Result<Vec<BatchRecord>> {
        let (listener, outcome) = FutureListener::new();
        self.get_batch(policy, keys, bin_names, listener);
        outcome.outcome().await
    }

    /// Existence of every key, in key order
    pub async fn exists_batch_async(
        &self,
        policy: Option<&BatchPolicy>,
        keys: Vec<Key>,
    ) -> Result<Vec<bool>> {
        let (listener, outcome) = FutureListener::new();
        self.exists_batch(policy, keys, listener);
        let records: Vec<BatchRecord> = outcome.outcome().await?;
        Ok(records.iter().map(BatchRecord::exists).collect())
    }
}

impl Drop for AsyncClient {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Builder for [`AsyncClient`]
pub struct AsyncClientBuilder {
    transport: Arc<dyn Transport>,
    router: Arc<dyn Router>,
    codec: Option<Arc<dyn Codec>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    config: EngineConfig,
}

impl AsyncClientBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Build the client and start its call sweeper on the current runtime
    pub fn build(self) -> AsyncClient {
        let mut engine = EngineContext::new(self.transport, self.router)
            .with_fallback_call_timeout(self.config.fallback_call_timeout());
        if let Some(codec) = self.codec {
            engine = engine.with_codec(codec);
        }
        if let Some(classifier) = self.classifier {
            engine = engine.with_classifier(classifier);
        }

        let engine = Arc::new(engine);
        let sweeper = engine
            .tracker
            .spawn_sweeper(self.config.sweep_interval());

        info!(
            binding = ?engine.transport.binding(),
            classifier = engine.classifier.classifier_name(),
            max_retries = self.config.default_policy.max_retries,
            total_timeout_ms = self.config.default_policy.total_timeout_ms,
            sweep_interval_ms = self.config.sweep_interval_ms,
            "🚀 Async client started"
        );

        AsyncClient {
            engine,
            default_policy: Arc::new(self.config.default_policy),
            batch_policy: self.config.batch_policy,
            sweeper,
        }
    }
}
