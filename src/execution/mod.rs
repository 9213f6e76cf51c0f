//! # Command Execution
//!
//! The asynchronous execution core: deadline arithmetic, failure classification,
//! the per-command state machine, the streaming call lifecycle and batch fan-out.
//!
//! ## Module map
//!
//! - [`deadline`]: budget of a command derived from its policy
//! - [`classifier`]: transport failure to domain error translation
//! - [`call`]: one request/response exchange with exactly-once termination
//! - [`command`]: the closed set of operations and their result-code handling
//! - [`executor`]: the Command Execution Unit driving attempts and retries
//! - [`batch`]: partitioning and aggregate completion of multi-key commands
//! - [`tracker`]: registry and expiry sweep of in-flight calls
//! - [`transport`]: the seam to the native and proxy bindings
//! - [`metrics`]: execution counters

pub mod batch;
pub mod call;
pub mod classifier;
pub mod command;
pub mod deadline;
pub mod executor;
pub mod metrics;
pub mod tracker;
pub mod transport;

pub use batch::{execute_batch, partition, AggregateCompletion, BatchKind, TargetDescriptor};
pub use call::{
    CallEvent, CallState, MethodId, ResponseFrame, ResponseObserver, ResponseShape, StreamingCall,
};
pub use classifier::{
    Classification, ErrorClassifier, IoErrorKind, StandardErrorClassifier, StatusCode,
    TransportFailure,
};
pub use command::{Command, CommandKind, NotFound};
pub use deadline::{compute_budget, Budget};
pub use executor::{
    AttemptContext, CommandExecution, EngineContext, ExecutionContext, ExecutionReport,
    ExecutionState,
};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use tracker::{CallTracker, SweepStats};
pub use transport::{ChannelTransport, DispatchedCall, Transport, TransportBinding};
