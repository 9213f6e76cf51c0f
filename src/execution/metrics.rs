//! # Engine Metrics
//!
//! Lock-free counters of command execution.
//!
//! ## Features
//!
//! - **Throughput**: commands started, attempts sent, retries scheduled
//! - **Outcomes**: successes, failures and the subset of failures that timed out
//! - **Fan-out**: batches and the sub-batches they produced
//!
//! Counters only grow; [`EngineMetrics::snapshot`] reads them into a serializable
//! value for health endpoints and tests.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub commands: u64,
    pub attempts: u64,
    pub retries: u64,
    pub successes: u64,
    pub failures: u64,
    /// Failures reported as timeouts
    pub timeouts: u64,
    pub batches: u64,
    pub sub_batches: u64,
}

impl MetricsSnapshot {
    /// Commands that have not reached a terminal outcome yet
    pub fn in_flight(&self) -> u64 {
        self.commands
            .saturating_sub(self.successes)
            .saturating_sub(self.failures)
    }
}

/// Engine-wide execution counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    commands: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    batches: AtomicU64,
    sub_batches: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, timed_out: bool) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_batch(&self, sub_batches: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.sub_batches
            .fetch_add(sub_batches as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands: self.commands.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            sub_batches: self.sub_batches.load(Ordering::Relaxed),
        }
    }
}
