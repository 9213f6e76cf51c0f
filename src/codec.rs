//! # Request/Response Codec
//!
//! The byte layout of requests and responses belongs to the connection layer, not
//! to the engine. The engine hands a [`Request`] to a [`Codec`] before every attempt
//! and asks it to turn the frames of a completed call into a [`DecodedResponse`].
//!
//! [`JsonCodec`] is a self-contained implementation over `serde_json`. It is what the
//! engine uses when embedded without a native wire codec, and what the test suite
//! speaks.

use crate::constants::ResultCode;
use crate::error::{ClientError, ErrorKind};
use crate::execution::call::ResponseFrame;
use crate::execution::command::CommandKind;
use crate::types::{Bin, Key, Record, UdfCall};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Timeouts forwarded to the server with each attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTimeouts {
    pub total_ms: u64,
    pub socket_ms: u64,
}

/// Everything a codec needs to encode one attempt
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    pub kind: CommandKind,

    /// Keys in request order; batch responses refer to them by position
    pub keys: Vec<&'a Key>,

    #[serde(skip_serializing_if = "is_empty_slice")]
    pub bins: &'a [Bin],

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin_names: Option<&'a [String]>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub udf: Option<&'a UdfCall>,

    /// Set when a sub-batch is restricted to a single namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<&'a str>,

    pub timeouts: RequestTimeouts,

    /// Attempt number, starting at 1
    pub iteration: u32,
}

fn is_empty_slice<T>(slice: &&[T]) -> bool {
    slice.is_empty()
}

/// Per-key entry of a batch response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Position of the key in the request
    pub index: usize,
    pub result_code: ResultCode,
    #[serde(default)]
    pub record: Option<Record>,
    #[serde(default)]
    pub in_doubt: bool,
}

/// Response of a completed call, merged across all of its frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodedResponse {
    pub result_code: ResultCode,
    pub record: Option<Record>,
    pub in_doubt: bool,
    pub batch_items: Vec<BatchItem>,
}

impl DecodedResponse {
    pub fn with_code(result_code: ResultCode) -> Self {
        Self {
            result_code,
            ..Self::default()
        }
    }

    pub fn with_record(record: Record) -> Self {
        Self {
            record: Some(record),
            ..Self::default()
        }
    }

    pub fn with_items(batch_items: Vec<BatchItem>) -> Self {
        Self {
            batch_items,
            ..Self::default()
        }
    }
}

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("failed to encode request: {0}")]
    Encode(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("call completed without a response frame")]
    EmptyResponse,
}

impl From<CodecError> for ClientError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Encode(message) => ClientError::serialization(message),
            other => ClientError::new(
                ErrorKind::Client,
                ResultCode::PARSE_ERROR,
                other.to_string(),
            ),
        }
    }
}

/// Wire codec seam
pub trait Codec: Send + Sync + Debug {
    fn encode(&self, request: &Request<'_>) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, kind: CommandKind, frames: &[ResponseFrame])
        -> Result<DecodedResponse, CodecError>;
}

/// JSON codec
///
/// Every frame carries one JSON encoded [`DecodedResponse`]. Frames are merged in
/// order: the first non-OK result code wins, in-doubt flags accumulate, the last
/// record wins and batch items are concatenated.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }

    /// Encode `response` as a final frame
    pub fn response_frame(response: &DecodedResponse) -> Result<ResponseFrame, CodecError> {
        serde_json::to_vec(response)
            .map(|payload| ResponseFrame::last(payload).with_in_doubt(response.in_doubt))
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Encode `response` as an intermediate frame of a streaming response
    pub fn partial_frame(response: &DecodedResponse) -> Result<ResponseFrame, CodecError> {
        Self::response_frame(response).map(|frame| ResponseFrame {
            has_next: true,
            ..frame
        })
    }
}

impl Codec for JsonCodec {
    fn encode(&self, request: &Request<'_>) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(request).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(
        &self,
        kind: CommandKind,
        frames: &[ResponseFrame],
    ) -> Result<DecodedResponse, CodecError> {
        if frames.is_empty() {
            return Err(CodecError::EmptyResponse);
        }

        let mut merged = DecodedResponse::default();
        for frame in frames {
            let part: DecodedResponse = serde_json::from_slice(&frame.payload)
                .map_err(|e| CodecError::Decode(format!("{kind:?} response: {e}")))?;

            if merged.result_code.is_ok() {
                merged.result_code = part.result_code;
            }
            merged.in_doubt |= part.in_doubt || frame.in_doubt;
            if part.record.is_some() {
                merged.record = part.record;
            }
            merged.batch_items.extend(part.batch_items);
        }

        Ok(merged)
    }
}
