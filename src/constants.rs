//! # Engine Constants
//!
//! Result codes and engine defaults. Result codes follow the server's numbering:
//! non-negative values are reported by the server, negative values are generated on
//! the client side.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Application-level status code carried by a decoded response or a client error
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ResultCode(pub i32);

impl ResultCode {
    /// No response was received for a batch key
    pub const NO_RESPONSE: ResultCode = ResultCode(-15);
    /// Maximum retries were exceeded before a terminal response arrived
    pub const MAX_RETRIES_EXCEEDED: ResultCode = ResultCode(-11);
    /// Request could not be serialized or was rejected as malformed
    pub const SERIALIZE_ERROR: ResultCode = ResultCode(-10);
    /// No server was available to service the request
    pub const SERVER_NOT_AVAILABLE: ResultCode = ResultCode(-8);
    /// No node could be resolved for the request
    pub const INVALID_NODE_ERROR: ResultCode = ResultCode(-3);
    /// Response could not be parsed
    pub const PARSE_ERROR: ResultCode = ResultCode(-2);
    /// Generic client side failure
    pub const CLIENT_ERROR: ResultCode = ResultCode(-1);
    /// Operation succeeded
    pub const OK: ResultCode = ResultCode(0);
    /// Unknown server failure
    pub const SERVER_ERROR: ResultCode = ResultCode(1);
    /// Record does not exist
    pub const KEY_NOT_FOUND_ERROR: ResultCode = ResultCode(2);
    /// Generation check failed
    pub const GENERATION_ERROR: ResultCode = ResultCode(3);
    /// Bad request parameter
    pub const PARAMETER_ERROR: ResultCode = ResultCode(4);
    /// Record already exists
    pub const KEY_EXISTS_ERROR: ResultCode = ResultCode(5);
    /// Command timed out
    pub const TIMEOUT: ResultCode = ResultCode(9);
    /// Record is being modified concurrently
    pub const KEY_BUSY: ResultCode = ResultCode(14);
    /// Operation is forbidden at this time
    pub const FORBIDDEN: ResultCode = ResultCode(22);
    /// Record was not touched because the filter expression evaluated to false
    pub const FILTERED_OUT: ResultCode = ResultCode(27);
    /// Batch functionality is disabled on the server
    pub const BATCH_DISABLED: ResultCode = ResultCode(150);
    /// User is not authenticated
    pub const NOT_AUTHENTICATED: ResultCode = ResultCode(80);
    /// Request quota was exceeded
    pub const QUOTA_EXCEEDED: ResultCode = ResultCode(83);
    /// User defined function returned an invalid response
    pub const UDF_BAD_RESPONSE: ResultCode = ResultCode(100);

    /// Numeric value of the code
    pub fn code(self) -> i32 {
        self.0
    }

    /// Check whether the code signals success
    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Check whether the code was generated by the client rather than the server
    pub fn is_client_side(self) -> bool {
        self.0 < 0
    }

    /// Short human readable description of the code
    pub fn description(self) -> &'static str {
        match self {
            Self::NO_RESPONSE => "No response received",
            Self::MAX_RETRIES_EXCEEDED => "Max retries exceeded",
            Self::SERIALIZE_ERROR => "Serialization error",
            Self::SERVER_NOT_AVAILABLE => "Server not available",
            Self::INVALID_NODE_ERROR => "Invalid node",
            Self::PARSE_ERROR => "Parse error",
            Self::CLIENT_ERROR => "Client error",
            Self::OK => "OK",
            Self::SERVER_ERROR => "Server error",
            Self::KEY_NOT_FOUND_ERROR => "Key not found",
            Self::GENERATION_ERROR => "Generation error",
            Self::PARAMETER_ERROR => "Parameter error",
            Self::KEY_EXISTS_ERROR => "Key already exists",
            Self::TIMEOUT => "Timeout",
            Self::KEY_BUSY => "Hot key",
            Self::FORBIDDEN => "Operation not allowed at this time",
            Self::FILTERED_OUT => "Transaction filtered out",
            Self::BATCH_DISABLED => "Batch functionality has been disabled",
            Self::NOT_AUTHENTICATED => "Not authenticated",
            Self::QUOTA_EXCEEDED => "Quota exceeded",
            Self::UDF_BAD_RESPONSE => "UDF returned error",
            _ => "Unknown result code",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.0)
    }
}

impl From<i32> for ResultCode {
    fn from(value: i32) -> Self {
        ResultCode(value)
    }
}

/// Engine defaults applied when configuration does not override them
pub mod defaults {
    /// Total timeout for single record commands
    pub const TOTAL_TIMEOUT_MS: u64 = 1_000;
    /// Per attempt socket timeout
    pub const SOCKET_TIMEOUT_MS: u64 = 30_000;
    /// Retries after the initial attempt
    pub const MAX_RETRIES: u32 = 2;
    /// Delay between attempts
    pub const SLEEP_BETWEEN_RETRIES_MS: u64 = 0;
    /// Batch total timeout
    pub const BATCH_TOTAL_TIMEOUT_MS: u64 = 1_000;
    /// Expiry applied to proxy calls that carry no deadline of their own
    pub const FALLBACK_CALL_TIMEOUT_MS: u64 = 10_000;
    /// Interval of the in-flight call expiry sweep
    pub const SWEEP_INTERVAL_MS: u64 = 100;
}

/// Bin names used by user defined function responses
pub mod udf {
    pub const SUCCESS_BIN: &str = "SUCCESS";
    pub const FAILURE_BIN: &str = "FAILURE";
}
