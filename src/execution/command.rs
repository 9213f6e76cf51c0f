//! # Command Variants
//!
//! The closed set of operations the engine executes. A [`Command`] owns the
//! immutable inputs of one operation together with the caller's completion, and
//! supplies the per-kind pieces the execution unit needs:
//!
//! - **route**: which node receives the next attempt
//! - **encode**: request bytes for an attempt, rebuilt from the inputs every time
//! - **settle**: interpretation of the decoded result code and delivery of the outcome
//!
//! Result-code handling differs per operation:
//!
//! | Operation | KEY_NOT_FOUND              | FILTERED_OUT                      |
//! |-----------|----------------------------|-----------------------------------|
//! | exists    | `false`                    | `true` unless `fail_on_filtered_out` |
//! | read      | error, or `None` when asked | `None` unless `fail_on_filtered_out` |
//! | write     | error                      | success unless `fail_on_filtered_out` |
//! | execute   | error                      | `None` unless `fail_on_filtered_out` |

use crate::codec::{Codec, DecodedResponse, Request};
use crate::constants::{udf, ResultCode};
use crate::error::{ClientError, ErrorKind, Result};
use crate::execution::batch::{AggregateCompletion, BatchKind, TargetDescriptor};
use crate::execution::call::{MethodId, ResponseShape};
use crate::execution::executor::AttemptContext;
use crate::listener::{Annotation, Completion, Listener};
use crate::policy::Policy;
use crate::routing::{Node, Router};
use crate::types::{BatchRecord, Bin, Key, Record, UdfCall, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Operation kind, as sent to the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Read,
    Write,
    Exists,
    Execute,
    BatchRead,
    BatchExists,
}

impl CommandKind {
    pub fn method(self) -> MethodId {
        match self {
            CommandKind::Read => MethodId::Read,
            CommandKind::Write => MethodId::Write,
            CommandKind::Exists => MethodId::Exists,
            CommandKind::Execute => MethodId::Execute,
            CommandKind::BatchRead | CommandKind::BatchExists => MethodId::BatchOperate,
        }
    }

    /// Batch responses arrive as a stream of frames, everything else as one frame
    pub fn response_shape(self) -> ResponseShape {
        if self.is_batch() {
            ResponseShape::Streaming
        } else {
            ResponseShape::Unary
        }
    }

    pub fn is_batch(self) -> bool {
        matches!(self, CommandKind::BatchRead | CommandKind::BatchExists)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Read => "read",
            CommandKind::Write => "write",
            CommandKind::Exists => "exists",
            CommandKind::Execute => "execute",
            CommandKind::BatchRead => "batch_read",
            CommandKind::BatchExists => "batch_exists",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a read reports a missing record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFound {
    /// Fail with KEY_NOT_FOUND
    #[default]
    Error,
    /// Succeed with `None`
    ReturnNone,
}

pub struct ReadCommand {
    pub key: Key,
    /// Bins to return; all bins when `None`
    pub bin_names: Option<Vec<String>>,
    pub not_found: NotFound,
    completion: Completion<Key, Option<Record>>,
}

pub struct WriteCommand {
    pub key: Key,
    pub bins: Vec<Bin>,
    completion: Completion<Key, ()>,
}

pub struct ExistsCommand {
    pub key: Key,
    completion: Completion<Key, bool>,
}

pub struct ExecuteCommand {
    pub key: Key,
    pub udf: UdfCall,
    completion: Completion<Key, Option<Value>>,
}

/// One sub-batch of a fanned-out batch command
pub struct BatchCommand {
    pub kind: BatchKind,
    /// Full key list of the parent batch
    pub keys: Arc<[Key]>,
    pub target: TargetDescriptor,
    aggregate: Arc<AggregateCompletion>,
}

impl BatchCommand {
    pub(crate) fn new(
        kind: BatchKind,
        keys: Arc<[Key]>,
        target: TargetDescriptor,
        aggregate: Arc<AggregateCompletion>,
    ) -> Self {
        Self {
            kind,
            keys,
            target,
            aggregate,
        }
    }

    fn settle(self, outcome: Result<DecodedResponse>, annotation: &Annotation) -> bool {
        let outcome = outcome.and_then(|decoded| {
            if decoded.result_code.is_ok() {
                Ok(decoded)
            } else {
                Err(ClientError::result_code(decoded.result_code))
            }
        });

        let succeeded = match outcome {
            Ok(decoded) => {
                for item in decoded.batch_items {
                    let Some((offset, key)) = self
                        .target
                        .offsets
                        .get(item.index)
                        .and_then(|&offset| Some((offset, self.keys.get(offset)?)))
                    else {
                        continue;
                    };
                    let record = match self.kind {
                        BatchKind::Read { .. } => item.record,
                        BatchKind::Exists => None,
                    };
                    self.aggregate.set_record(
                        offset,
                        BatchRecord {
                            key: key.clone(),
                            record,
                            result_code: item.result_code,
                            in_doubt: item.in_doubt,
                        },
                    );
                }
                true
            }
            Err(error) => {
                let error = annotation.apply(error);
                for &offset in &self.target.offsets {
                    let Some(key) = self.keys.get(offset) else {
                        continue;
                    };
                    self.aggregate.set_record(
                        offset,
                        BatchRecord {
                            key: key.clone(),
                            record: None,
                            result_code: error.code(),
                            in_doubt: error.in_doubt(),
                        },
                    );
                }
                self.aggregate.record_failure(error);
                false
            }
        };

        self.aggregate.complete_one();
        succeeded
    }
}

/// Closed set of executable operations
pub enum Command {
    Read(ReadCommand),
    Write(WriteCommand),
    Exists(ExistsCommand),
    Execute(ExecuteCommand),
    Batch(BatchCommand),
}

impl Command {
    pub fn read(
        key: Key,
        bin_names: Option<Vec<String>>,
        not_found: NotFound,
        listener: impl Listener<Key, Option<Record>>,
    ) -> Self {
        Command::Read(ReadCommand {
            key,
            bin_names,
            not_found,
            completion: Completion::new(listener),
        })
    }

    pub fn write(key: Key, bins: Vec<Bin>, listener: impl Listener<Key, ()>) -> Self {
        Command::Write(WriteCommand {
            key,
            bins,
            completion: Completion::new(listener),
        })
    }

    pub fn exists(key: Key, listener: impl Listener<Key, bool>) -> Self {
        Command::Exists(ExistsCommand {
            key,
            completion: Completion::new(listener),
        })
    }

    pub fn execute(key: Key, udf: UdfCall, listener: impl Listener<Key, Option<Value>>) -> Self {
        Command::Execute(ExecuteCommand {
            key,
            udf,
            completion: Completion::new(listener),
        })
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Read(_) => CommandKind::Read,
            Command::Write(_) => CommandKind::Write,
            Command::Exists(_) => CommandKind::Exists,
            Command::Execute(_) => CommandKind::Execute,
            Command::Batch(batch) => match batch.kind {
                BatchKind::Read { .. } => CommandKind::BatchRead,
                BatchKind::Exists => CommandKind::BatchExists,
            },
        }
    }

    /// Key of a single-record command
    pub fn key(&self) -> Option<&Key> {
        match self {
            Command::Read(c) => Some(&c.key),
            Command::Write(c) => Some(&c.key),
            Command::Exists(c) => Some(&c.key),
            Command::Execute(c) => Some(&c.key),
            Command::Batch(_) => None,
        }
    }

    /// Node for the next attempt. Sub-batches stay on the node they were
    /// partitioned to.
    pub fn route(&self, router: &dyn Router) -> Result<Arc<Node>> {
        match self {
            Command::Batch(batch) => Ok(Arc::clone(&batch.target.node)),
            single => match single.key() {
                Some(key) => router.resolve_node(key),
                None => Err(ClientError::client("command has no key to route")),
            },
        }
    }

    /// Request bytes for one attempt
    pub fn encode(&self, codec: &dyn Codec, attempt: &AttemptContext) -> Result<Vec<u8>> {
        let mut request = Request {
            kind: self.kind(),
            keys: Vec::new(),
            bins: &[],
            bin_names: None,
            udf: None,
            namespace: None,
            timeouts: attempt.timeouts,
            iteration: attempt.iteration,
        };

        match self {
            Command::Read(c) => {
                request.keys.push(&c.key);
                request.bin_names = c.bin_names.as_deref();
            }
            Command::Write(c) => {
                request.keys.push(&c.key);
                request.bins = &c.bins;
            }
            Command::Exists(c) => request.keys.push(&c.key),
            Command::Execute(c) => {
                request.keys.push(&c.key);
                request.udf = Some(&c.udf);
            }
            Command::Batch(c) => {
                request.keys = c
                    .target
                    .offsets
                    .iter()
                    .map(|&offset| {
                        c.keys.get(offset).ok_or_else(|| {
                            ClientError::client(format!(
                                "batch key offset {offset} outside {} keys",
                                c.keys.len()
                            ))
                        })
                    })
                    .collect::<Result<_>>()?;
                request.namespace = c.target.namespace.as_deref();
                if let BatchKind::Read { bin_names } = &c.kind {
                    request.bin_names = bin_names.as_deref();
                }
            }
        }

        Ok(codec.encode(&request)?)
    }

    /// Interpret the final outcome and deliver it to the caller. Returns whether the
    /// caller (or the sub-batch) observed success.
    pub fn settle(
        self,
        outcome: Result<DecodedResponse>,
        policy: &Policy,
        annotation: &Annotation,
    ) -> bool {
        match self {
            Command::Read(c) => {
                let not_found = c.not_found;
                deliver(c.completion, c.key, outcome, annotation, |decoded| {
                    interpret_read(decoded, not_found, policy)
                })
            }
            Command::Write(c) => deliver(c.completion, c.key, outcome, annotation, |decoded| {
                interpret_write(decoded.result_code, policy)
            }),
            Command::Exists(c) => deliver(c.completion, c.key, outcome, annotation, |decoded| {
                interpret_exists(decoded.result_code, policy)
            }),
            Command::Execute(c) => deliver(c.completion, c.key, outcome, annotation, |decoded| {
                interpret_execute(decoded, policy)
            }),
            Command::Batch(c) => c.settle(outcome, annotation),
        }
    }
}

fn deliver<T: 'static>(
    completion: Completion<Key, T>,
    key: Key,
    outcome: Result<DecodedResponse>,
    annotation: &Annotation,
    interpret: impl FnOnce(DecodedResponse) -> Result<T>,
) -> bool {
    let result = outcome.and_then(interpret);
    let succeeded = result.is_ok();
    completion.resolve(result.map(|value| (key, value)), annotation);
    succeeded
}

fn filtered_out<T>(policy: &Policy, value: T) -> Result<T> {
    if policy.fail_on_filtered_out {
        Err(ClientError::result_code(ResultCode::FILTERED_OUT))
    } else {
        Ok(value)
    }
}

pub fn interpret_exists(code: ResultCode, policy: &Policy) -> Result<bool> {
    match code {
        ResultCode::OK => Ok(true),
        ResultCode::KEY_NOT_FOUND_ERROR => Ok(false),
        ResultCode::FILTERED_OUT => filtered_out(policy, true),
        other => Err(ClientError::result_code(other)),
    }
}

pub fn interpret_read(
    decoded: DecodedResponse,
    not_found: NotFound,
    policy: &Policy,
) -> Result<Option<Record>> {
    match decoded.result_code {
        ResultCode::OK => Ok(Some(decoded.record.unwrap_or_default())),
        ResultCode::KEY_NOT_FOUND_ERROR => match not_found {
            NotFound::ReturnNone => Ok(None),
            NotFound::Error => Err(ClientError::result_code(ResultCode::KEY_NOT_FOUND_ERROR)),
        },
        ResultCode::FILTERED_OUT => filtered_out(policy, None),
        other => Err(ClientError::result_code(other)),
    }
}

pub fn interpret_write(code: ResultCode, policy: &Policy) -> Result<()> {
    match code {
        ResultCode::OK => Ok(()),
        ResultCode::FILTERED_OUT => filtered_out(policy, ()),
        other => Err(ClientError::result_code(other)),
    }
}

pub fn interpret_execute(decoded: DecodedResponse, policy: &Policy) -> Result<Option<Value>> {
    match decoded.result_code {
        ResultCode::OK => parse_udf_result(decoded.record.as_ref()),
        ResultCode::FILTERED_OUT => filtered_out(policy, None),
        other => Err(ClientError::result_code(other)),
    }
}

/// Extract the return value of a user defined function from its result record
pub fn parse_udf_result(record: Option<&Record>) -> Result<Option<Value>> {
    let Some(record) = record else {
        return Ok(None);
    };

    match record.get(udf::SUCCESS_BIN) {
        Some(Value::Null) => return Ok(None),
        Some(value) => return Ok(Some(value.clone())),
        None => {}
    }

    match record.get(udf::FAILURE_BIN) {
        Some(failure) if !failure.is_null() => {
            let message = match failure {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            Err(ClientError::new(
                ErrorKind::RemoteResultCode(ResultCode::UDF_BAD_RESPONSE),
                ResultCode::UDF_BAD_RESPONSE,
                message,
            ))
        }
        _ => Err(ClientError::new(
            ErrorKind::Client,
            ResultCode::UDF_BAD_RESPONSE,
            "Invalid UDF return value",
        )),
    }
}
