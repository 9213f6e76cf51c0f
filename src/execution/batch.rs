//! # Batch Fan-out
//!
//! A batch command over many keys becomes one sub-batch per owning node. Each
//! sub-batch runs as its own [`CommandExecution`] with its own retries; siblings never
//! cancel each other. They share an [`AggregateCompletion`] that records per-key
//! outcomes and fires the caller's listener exactly once, when the last sub-batch
//! reaches a terminal state.
//!
//! ## Partitioning
//!
//! Keys are grouped by node in first-seen order, keeping key order inside each
//! group. Nodes that cannot take a consolidated batch (an older protocol, or a policy
//! that forces direct batches) get one sub-batch per namespace instead.
//!
//! ```text
//!  keys: [a1 b1 a2 c1 b2]        node A: [a1 a2]  ──▶ CEU ─┐
//!          │ resolve_node         node B: [b1 b2]  ──▶ CEU ─┼──▶ AggregateCompletion ──▶ listener
//!          ▼                      node C: [c1]     ──▶ CEU ─┘
//! ```

use crate::error::{ClientError, Result};
use crate::execution::command::{BatchCommand, Command};
use crate::execution::executor::{CommandExecution, EngineContext, ExecutionReport};
use crate::listener::{Annotation, BatchListener, Completion};
use crate::policy::BatchPolicy;
use crate::routing::{Node, Router};
use crate::types::{BatchRecord, Key};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a batch command does with each key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchKind {
    /// Read records, restricted to `bin_names` when given
    Read { bin_names: Option<Arc<[String]>> },
    Exists,
}

/// One (node, key subset) unit of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub node: Arc<Node>,
    /// Offsets into the batch key list, in key order
    pub offsets: Vec<usize>,
    /// Namespace of every key in this descriptor when split per namespace
    pub namespace: Option<String>,
}

/// Split `keys` into per-node (and, where required, per-namespace) descriptors
///
/// Every key offset appears in exactly one descriptor.
pub fn partition(
    keys: &[Key],
    policy: &BatchPolicy,
    router: &dyn Router,
) -> Result<Vec<TargetDescriptor>> {
    let mut descriptors = Vec::new();
    let mut assigned = vec![false; keys.len()];

    for (node, offsets) in router.partition_by_node(keys)? {
        for &offset in &offsets {
            match assigned.get_mut(offset) {
                Some(seen) if !*seen => *seen = true,
                Some(_) => {
                    return Err(ClientError::client(format!(
                        "router assigned key offset {offset} more than once"
                    )))
                }
                None => {
                    return Err(ClientError::client(format!(
                        "router returned key offset {offset} for a batch of {} keys",
                        keys.len()
                    )))
                }
            }
        }
        if offsets.is_empty() {
            continue;
        }

        if node.supports_consolidated_batch(policy) {
            descriptors.push(TargetDescriptor {
                node,
                offsets,
                namespace: None,
            });
            continue;
        }

        let mut by_namespace: Vec<(String, Vec<usize>)> = Vec::new();
        for offset in offsets {
            let namespace = &keys[offset].namespace;
            match by_namespace.iter_mut().find(|(ns, _)| ns == namespace) {
                Some((_, group)) => group.push(offset),
                None => by_namespace.push((namespace.clone(), vec![offset])),
            }
        }

        descriptors.extend(by_namespace.into_iter().map(|(namespace, offsets)| {
            TargetDescriptor {
                node: Arc::clone(&node),
                offsets,
                namespace: Some(namespace),
            }
        }));
    }

    if let Some(offset) = assigned.iter().position(|seen| !seen) {
        return Err(ClientError::client(format!(
            "router left key offset {offset} unassigned"
        )));
    }

    Ok(descriptors)
}

/// Shared completion state of the sub-batches of one batch
pub struct AggregateCompletion {
    total: usize,
    completed: AtomicUsize,
    keys: Arc<[Key]>,
    slots: Box<[OnceLock<BatchRecord>]>,
    first_error: OnceLock<ClientError>,
    completion: Mutex<Option<Completion<Vec<Key>, Vec<BatchRecord>>>>,
}

impl AggregateCompletion {
    pub fn new(total: usize, keys: Arc<[Key]>, listener: BatchListener) -> Self {
        let slots = (0..keys.len()).map(|_| OnceLock::new()).collect();
        Self {
            total,
            completed: AtomicUsize::new(0),
            keys,
            slots,
            first_error: OnceLock::new(),
            completion: Mutex::new(Some(Completion::new(listener))),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Store the outcome for one key. The first outcome for a slot wins.
    pub fn set_record(&self, offset: usize, record: BatchRecord) -> bool {
        self.slots
            .get(offset)
            .is_some_and(|slot| slot.set(record).is_ok())
    }

    /// Remember a sub-batch failure; only the first one is reported
    pub fn record_failure(&self, error: ClientError) {
        if let Err(later) = self.first_error.set(error) {
            debug!(error = %later, "Additional sub-batch failure");
        }
    }

    /// Mark one sub-batch terminal. The caller whose increment reaches `total`
    /// delivers the aggregate outcome and gets `true` back.
    pub fn complete_one(&self) -> bool {
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if completed != self.total {
            return false;
        }

        let Some(completion) = self.completion.lock().take() else {
            warn!("Batch listener already notified");
            return false;
        };

        let records: Vec<BatchRecord> = self
            .slots
            .iter()
            .zip(self.keys.iter())
            .map(|(slot, key)| {
                slot.get()
                    .cloned()
                    .unwrap_or_else(|| BatchRecord::unresolved(key.clone()))
            })
            .collect();

        match self.first_error.get() {
            None => {
                info!(keys = records.len(), sub_batches = self.total, "✅ Batch completed");
                completion.resolve(Ok((self.keys.to_vec(), records)), &Annotation::default());
            }
            Some(error) => {
                warn!(
                    keys = records.len(),
                    sub_batches = self.total,
                    error = %error,
                    "❌ Batch completed with failures"
                );
                let error = error.clone().with_batch_records(records);
                completion.resolve(Err(error), &Annotation::default());
            }
        }
        true
    }
}

/// Fan `keys` out across the cluster and report through `listener`
///
/// Returns the handles of the spawned sub-batch executions. An empty key list
/// succeeds at once and a routing failure fails at once; neither spawns anything.
pub fn execute_batch(
    engine: &Arc<EngineContext>,
    policy: &BatchPolicy,
    kind: BatchKind,
    keys: Vec<Key>,
    listener: BatchListener,
) -> Vec<JoinHandle<ExecutionReport>> {
    if keys.is_empty() {
        Completion::new(listener).resolve(Ok((Vec::new(), Vec::new())), &Annotation::default());
        return Vec::new();
    }

    let descriptors = match partition(&keys, policy, engine.router.as_ref()) {
        Ok(descriptors) => descriptors,
        Err(error) => {
            warn!(error = %error, keys = keys.len(), "❌ Batch partitioning failed");
            Completion::new(listener).resolve(Err(error), &Annotation::default());
            return Vec::new();
        }
    };

    engine.metrics.record_batch(descriptors.len());
    debug!(
        keys = keys.len(),
        sub_batches = descriptors.len(),
        "Fanning out batch"
    );

    let keys: Arc<[Key]> = keys.into();
    let aggregate = Arc::new(AggregateCompletion::new(
        descriptors.len(),
        Arc::clone(&keys),
        listener,
    ));
    let sub_policy = Arc::new(policy.base.clone());

    descriptors
        .into_iter()
        .map(|target| {
            let command = Command::Batch(BatchCommand::new(
                kind.clone(),
                Arc::clone(&keys),
                target,
                Arc::clone(&aggregate),
            ));
            CommandExecution::new(command, Arc::clone(&sub_policy), Arc::clone(engine)).spawn()
        })
        .collect()
}
