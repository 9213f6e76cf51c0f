#![allow(clippy::doc_markdown)] // Allow technical terms like UDF, gRPC in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # KVS Core
//!
//! Asynchronous command-execution engine of a key-value database client.
//!
//! ## Overview
//!
//! Every operation a caller issues (read, write, exists, UDF execute, batch read,
//! batch exists) becomes one or more commands. Each command is driven by its own
//! execution unit through sequential attempts against the owning node, bounded by a
//! per-attempt timeout, a total deadline and a retry count. Transport failures are
//! classified into a small set of domain errors that decide whether another attempt
//! is made and whether the outcome is in doubt. Batch commands fan out into one
//! sub-command per node and report back through a single aggregate completion.
//!
//! ## Module Organization
//!
//! - [`client`] - Public entry point with listener and `async fn` operations
//! - [`execution`] - Deadline policy, classifier, execution unit, call lifecycle, batch fan-out
//! - [`codec`] - Request encoding and response decoding seam
//! - [`routing`] - Key to node resolution seam
//! - [`listener`] - Caller callbacks and the single-use completion guard
//! - [`policy`] - Per-command timeout and retry settings
//! - [`config`] - Layered engine configuration
//! - [`error`] - Domain error kinds and the annotated client error
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kvs_core::client::AsyncClient;
//! use kvs_core::config::EngineConfig;
//! use kvs_core::execution::{ChannelTransport, TransportBinding};
//! use kvs_core::routing::{Node, StaticRouter};
//! use kvs_core::types::{Bin, Key};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::from_env()?;
//! kvs_core::logging::init_logging_with_level(config.log_level.as_deref());
//!
//! let (transport, _calls) = ChannelTransport::new(TransportBinding::Native, 256);
//! let router = StaticRouter::new(vec![Node::new("A", "10.0.0.1:3000")]);
//! let client = AsyncClient::new(Arc::new(transport), Arc::new(router), &config);
//!
//! let key = Key::new("test", "users", "alice");
//! client.put_async(None, key.clone(), vec![Bin::new("age", 42)]).await?;
//! let record = client.get_async(None, key, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod listener;
pub mod logging;
pub mod policy;
pub mod routing;
pub mod types;

pub use client::{AsyncClient, AsyncClientBuilder};
pub use config::{ConfigurationError, EngineConfig};
pub use constants::ResultCode;
pub use error::{CallbackError, ClientError, ErrorKind, Result};
pub use listener::{FutureListener, Listener};
pub use policy::{BatchPolicy, Policy};
pub use types::{BatchRecord, Bin, Key, Record, UdfCall, UserKey, Value};
