//! Error types delivered to command listeners.
//!
//! Callers never see raw transport failures: every failure is classified into an
//! [`ErrorKind`] and annotated with the final iteration, the in-doubt flag and the
//! policy the command ran under before it reaches `on_failure`.

use crate::constants::ResultCode;
use crate::policy::Policy;
use crate::types::BatchRecord;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a caller's own success callback
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Domain error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// Deadline elapsed before a terminal response arrived
    #[error("Timeout")]
    Timeout,
    /// Remote endpoint temporarily unreachable
    #[error("Server unavailable")]
    ServerUnavailable,
    /// Malformed request
    #[error("Serialization error")]
    Serialization,
    #[error("Forbidden")]
    Forbidden,
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Quota exceeded")]
    QuotaExceeded,
    /// Unexpected or unclassified client side fault
    #[error("Client error")]
    Client,
    /// Application level status decoded from a response
    #[error("Remote result code {0}")]
    RemoteResultCode(ResultCode),
}

/// Classified, policy-annotated command failure
#[derive(Debug, Clone)]
pub struct ClientError {
    kind: ErrorKind,
    result_code: ResultCode,
    message: String,
    iteration: u32,
    in_doubt: bool,
    retries_exhausted: bool,
    node: Option<String>,
    policy: Option<Arc<Policy>>,
    batch_records: Option<Arc<[BatchRecord]>>,
    cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ClientError {
    pub fn new(kind: ErrorKind, result_code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            result_code,
            message: message.into(),
            iteration: 1,
            in_doubt: false,
            retries_exhausted: false,
            node: None,
            policy: None,
            batch_records: None,
            cause: None,
        }
    }

    /// Error for a decoded application result code
    pub fn result_code(code: ResultCode) -> Self {
        Self::new(ErrorKind::RemoteResultCode(code), code, code.description())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, ResultCode::TIMEOUT, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, ResultCode::SERIALIZE_ERROR, message)
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Client, ResultCode::CLIENT_ERROR, message)
    }

    /// Client error wrapping an underlying cause
    pub fn with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        let mut error = Self::client(message);
        error.cause = Some(Arc::new(cause));
        error
    }

    /// Client error raised by a listener's success callback
    pub fn callback(cause: CallbackError) -> Self {
        let mut error = Self::client(format!("success callback failed: {cause}"));
        error.cause = Some(Arc::from(cause));
        error
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> ResultCode {
        self.result_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Attempt number the command had reached when it failed
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn in_doubt(&self) -> bool {
        self.in_doubt
    }

    /// Whether a retryable failure ran out of retries
    pub fn retries_exhausted(&self) -> bool {
        self.retries_exhausted
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn policy(&self) -> Option<&Arc<Policy>> {
        self.policy.as_ref()
    }

    /// Per-key outcomes of a batch whose aggregate result is this error
    pub fn batch_records(&self) -> Option<&[BatchRecord]> {
        self.batch_records.as_deref()
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    pub(crate) fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    /// In-doubt is sticky: annotation can raise it but never clear it
    pub(crate) fn set_in_doubt(&mut self, in_doubt: bool) {
        self.in_doubt |= in_doubt;
    }

    pub(crate) fn set_policy(&mut self, policy: Arc<Policy>) {
        self.policy = Some(policy);
    }

    pub(crate) fn set_node(&mut self, node: Option<String>) {
        if node.is_some() {
            self.node = node;
        }
    }

    /// Attach the underlying failure, reported through `source()`
    pub(crate) fn caused_by(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub(crate) fn mark_retries_exhausted(mut self) -> Self {
        self.retries_exhausted = true;
        self
    }

    pub(crate) fn with_batch_records(mut self, records: Vec<BatchRecord>) -> Self {
        self.batch_records = Some(records.into());
        self
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {}: {}", self.result_code.code(), self.message)?;
        if let Some(node) = &self.node {
            write!(f, " [node={node}]")?;
        }
        if self.retries_exhausted {
            write!(f, " (retries exhausted after {} attempts)", self.iteration)?;
        } else if self.iteration > 1 {
            write!(f, " (iteration={})", self.iteration)?;
        }
        if self.in_doubt {
            write!(f, " (in doubt)")?;
        }
        Ok(())
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| &**cause as &(dyn std::error::Error + 'static))
    }
}

impl PartialEq for ClientError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.result_code == other.result_code
            && self.message == other.message
            && self.iteration == other.iteration
            && self.in_doubt == other.in_doubt
            && self.retries_exhausted == other.retries_exhausted
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
