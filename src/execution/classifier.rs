//! # Transport Failure Classification
//!
//! Maps a transport-level failure onto the domain error model and decides, in the
//! same pass, whether the failure is worth another attempt and whether it leaves
//! the outcome of the command ambiguous.
//!
//! ## Overview
//!
//! Two bindings report failures differently. The proxy binding surfaces a remote
//! status code, the native binding surfaces socket level I/O errors. The engine
//! itself raises bare result codes (for example when the expiry sweep fails a call
//! nobody answered). All three enter as a [`TransportFailure`] and leave as a
//! [`Classification`]:
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ TransportFailure │────▶│ ErrorClassifier │────▶│ Classification  │
//! │ status / io / rc │     │ Strategy        │     │ kind + retry    │
//! └──────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! ## Status translation
//!
//! | Status            | Kind              | Retry | In doubt |
//! |-------------------|-------------------|-------|----------|
//! | Unavailable       | ServerUnavailable | yes   | yes      |
//! | DeadlineExceeded  | Timeout           | no    | yes      |
//! | InvalidArgument   | Serialization     | no    | no       |
//! | PermissionDenied  | Forbidden         | no    | no       |
//! | Unauthenticated   | NotAuthenticated  | no    | no       |
//! | ResourceExhausted | QuotaExceeded     | no    | no       |
//! | anything else     | Client            | no    | yes      |

use crate::constants::ResultCode;
use crate::error::{ClientError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Standardized remote status codes reported by the proxy binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        };
        f.write_str(name)
    }
}

/// Socket level failure categories reported by the native binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoErrorKind {
    /// Connection was refused before any bytes were sent
    ConnectionRefused,
    ConnectionReset,
    /// Peer closed the connection mid-exchange
    ConnectionClosed,
    TimedOut,
    Other,
}

impl From<std::io::ErrorKind> for IoErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        use std::io::ErrorKind as Io;
        match kind {
            Io::ConnectionRefused => IoErrorKind::ConnectionRefused,
            Io::ConnectionReset | Io::ConnectionAborted => IoErrorKind::ConnectionReset,
            Io::BrokenPipe | Io::UnexpectedEof | Io::NotConnected => IoErrorKind::ConnectionClosed,
            Io::TimedOut | Io::WouldBlock => IoErrorKind::TimedOut,
            _ => IoErrorKind::Other,
        }
    }
}

/// Failure reported for a call before it produced a terminal response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
    #[error("status {code}: {message}")]
    Status { code: StatusCode, message: String },

    #[error("io error ({kind:?}): {message}")]
    Io { kind: IoErrorKind, message: String },

    #[error("result code {0}")]
    ResultCode(ResultCode),
}

impl TransportFailure {
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        TransportFailure::Status {
            code,
            message: message.into(),
        }
    }

    pub fn io(kind: IoErrorKind, message: impl Into<String>) -> Self {
        TransportFailure::Io {
            kind,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TransportFailure {
    fn from(error: std::io::Error) -> Self {
        TransportFailure::io(error.kind().into(), error.to_string())
    }
}

/// Result of classifying a [`TransportFailure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub result_code: ResultCode,

    /// Another attempt may succeed
    pub retryable: bool,

    /// The request may have been applied on the server
    pub in_doubt: bool,

    pub message: String,

    /// Transport failure the classification was derived from
    pub cause: Option<TransportFailure>,
}

impl Classification {
    fn new(
        kind: ErrorKind,
        result_code: ResultCode,
        retryable: bool,
        in_doubt: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            result_code,
            retryable,
            in_doubt,
            message: message.into(),
            cause: None,
        }
    }

    fn caused_by(mut self, failure: &TransportFailure) -> Self {
        self.cause = Some(failure.clone());
        self
    }

    /// Domain error carrying this classification and its underlying cause
    pub fn to_error(&self) -> ClientError {
        let mut error = ClientError::new(self.kind, self.result_code, self.message.clone());
        error.set_in_doubt(self.in_doubt);
        match &self.cause {
            Some(cause) => error.caused_by(cause.clone()),
            None => error,
        }
    }
}

/// Trait for transport failure classification strategies
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, failure: &TransportFailure) -> Classification;

    /// Get the classifier name for identification
    fn classifier_name(&self) -> &'static str;
}

/// Standard classifier implementing the default translation tables
#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier;

impl StandardErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    fn classify_status(&self, code: StatusCode, message: &str) -> Classification {
        let message = format!("{code}: {message}");
        match code {
            StatusCode::Unavailable => Classification::new(
                ErrorKind::ServerUnavailable,
                ResultCode::SERVER_NOT_AVAILABLE,
                true,
                true,
                message,
            ),
            StatusCode::DeadlineExceeded => Classification::new(
                ErrorKind::Timeout,
                ResultCode::TIMEOUT,
                false,
                true,
                message,
            ),
            StatusCode::InvalidArgument => Classification::new(
                ErrorKind::Serialization,
                ResultCode::SERIALIZE_ERROR,
                false,
                false,
                message,
            ),
            StatusCode::PermissionDenied => Classification::new(
                ErrorKind::Forbidden,
                ResultCode::FORBIDDEN,
                false,
                false,
                message,
            ),
            StatusCode::Unauthenticated => Classification::new(
                ErrorKind::NotAuthenticated,
                ResultCode::NOT_AUTHENTICATED,
                false,
                false,
                message,
            ),
            StatusCode::ResourceExhausted => Classification::new(
                ErrorKind::QuotaExceeded,
                ResultCode::QUOTA_EXCEEDED,
                false,
                false,
                message,
            ),
            // Unknown statuses could have hit the server after the request was applied.
            _ => Classification::new(
                ErrorKind::Client,
                ResultCode::CLIENT_ERROR,
                false,
                true,
                message,
            ),
        }
    }

    fn classify_io(&self, kind: IoErrorKind, message: &str) -> Classification {
        match kind {
            IoErrorKind::ConnectionRefused => Classification::new(
                ErrorKind::ServerUnavailable,
                ResultCode::SERVER_NOT_AVAILABLE,
                true,
                false,
                format!("connection refused: {message}"),
            ),
            IoErrorKind::ConnectionReset | IoErrorKind::ConnectionClosed => Classification::new(
                ErrorKind::ServerUnavailable,
                ResultCode::SERVER_NOT_AVAILABLE,
                true,
                true,
                format!("connection lost: {message}"),
            ),
            IoErrorKind::TimedOut => Classification::new(
                ErrorKind::Timeout,
                ResultCode::TIMEOUT,
                true,
                true,
                format!("socket timeout: {message}"),
            ),
            IoErrorKind::Other => Classification::new(
                ErrorKind::Client,
                ResultCode::CLIENT_ERROR,
                false,
                false,
                message,
            ),
        }
    }

    fn classify_result_code(&self, code: ResultCode) -> Classification {
        match code {
            // Raised for calls that were sent and never answered.
            ResultCode::TIMEOUT => Classification::new(
                ErrorKind::Timeout,
                code,
                false,
                true,
                "call expired before a response arrived",
            ),
            ResultCode::SERVER_NOT_AVAILABLE => Classification::new(
                ErrorKind::ServerUnavailable,
                code,
                true,
                false,
                code.description(),
            ),
            _ => Classification::new(
                ErrorKind::RemoteResultCode(code),
                code,
                false,
                false,
                code.description(),
            ),
        }
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify(&self, failure: &TransportFailure) -> Classification {
        match failure {
            TransportFailure::Status { code, message } => {
                self.classify_status(*code, message).caused_by(failure)
            }
            TransportFailure::Io { kind, message } => {
                self.classify_io(*kind, message).caused_by(failure)
            }
            TransportFailure::ResultCode(code) => self.classify_result_code(*code),
        }
    }

    fn classifier_name(&self) -> &'static str {
        "StandardErrorClassifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(failure: TransportFailure) -> Classification {
        StandardErrorClassifier::new().classify(&failure)
    }

    #[test]
    fn test_status_translation_table() {
        let cases = [
            (StatusCode::Unavailable, ErrorKind::ServerUnavailable, ResultCode::SERVER_NOT_AVAILABLE, true, true),
            (StatusCode::DeadlineExceeded, ErrorKind::Timeout, ResultCode::TIMEOUT, false, true),
            (StatusCode::InvalidArgument, ErrorKind::Serialization, ResultCode::SERIALIZE_ERROR, false, false),
            (StatusCode::PermissionDenied, ErrorKind::Forbidden, ResultCode::FORBIDDEN, false, false),
            (StatusCode::Unauthenticated, ErrorKind::NotAuthenticated, ResultCode::NOT_AUTHENTICATED, false, false),
            (StatusCode::ResourceExhausted, ErrorKind::QuotaExceeded, ResultCode::QUOTA_EXCEEDED, false, false),
            (StatusCode::Internal, ErrorKind::Client, ResultCode::CLIENT_ERROR, false, true),
        ];

        for (status, kind, code, retryable, in_doubt) in cases {
            let classification = classify(TransportFailure::status(status, "boom"));
            assert_eq!(classification.kind, kind, "{status}");
            assert_eq!(classification.result_code, code, "{status}");
            assert_eq!(classification.retryable, retryable, "{status}");
            assert_eq!(classification.in_doubt, in_doubt, "{status}");
        }
    }

    #[test]
    fn test_refused_connection_is_not_in_doubt() {
        let refused = classify(TransportFailure::io(IoErrorKind::ConnectionRefused, "refused"));
        assert!(refused.retryable);
        assert!(!refused.in_doubt);

        let reset = classify(TransportFailure::io(IoErrorKind::ConnectionReset, "reset"));
        assert!(reset.retryable);
        assert!(reset.in_doubt);
    }

    #[test]
    fn test_socket_timeout_is_retryable_and_in_doubt() {
        let classification = classify(TransportFailure::io(IoErrorKind::TimedOut, "read"));
        assert_eq!(classification.kind, ErrorKind::Timeout);
        assert!(classification.retryable);
        assert!(classification.in_doubt);
    }

    #[test]
    fn test_std_io_errors_map_onto_io_kinds() {
        let failure: TransportFailure =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(
            failure,
            TransportFailure::Io {
                kind: IoErrorKind::ConnectionClosed,
                ..
            }
        ));
    }

    #[test]
    fn test_engine_timeout_code_is_fatal() {
        let classification = classify(TransportFailure::ResultCode(ResultCode::TIMEOUT));
        assert_eq!(classification.kind, ErrorKind::Timeout);
        assert!(!classification.retryable);
        assert!(classification.in_doubt);

        let other = classify(TransportFailure::ResultCode(ResultCode::KEY_BUSY));
        assert_eq!(other.kind, ErrorKind::RemoteResultCode(ResultCode::KEY_BUSY));
    }

    #[test]
    fn test_classification_to_error_keeps_in_doubt() {
        let error = classify(TransportFailure::status(StatusCode::Unavailable, "down")).to_error();
        assert_eq!(error.kind(), ErrorKind::ServerUnavailable);
        assert!(error.in_doubt());
        assert!(error.message().contains("UNAVAILABLE"));
    }

    #[test]
    fn test_unclassified_failures_keep_their_cause() {
        use std::error::Error;

        let failure = TransportFailure::status(StatusCode::Internal, "stream reset by proxy");
        let error = classify(failure.clone()).to_error();
        assert_eq!(error.kind(), ErrorKind::Client);
        let source = error.source().expect("transport failure preserved as source");
        assert_eq!(source.to_string(), failure.to_string());

        let io = classify(TransportFailure::io(IoErrorKind::Other, "tls handshake")).to_error();
        assert_eq!(io.kind(), ErrorKind::Client);
        assert!(io.source().is_some_and(|s| s.to_string().contains("tls handshake")));

        let code = classify(TransportFailure::ResultCode(ResultCode::KEY_BUSY)).to_error();
        assert!(code.source().is_none());
    }
}
