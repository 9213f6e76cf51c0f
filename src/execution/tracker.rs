//! # In-flight Call Tracker
//!
//! Registry of calls handed to a transport. It holds weak references only, so a
//! call is kept alive by its owning command and its transport, never by the
//! tracker.
//!
//! A periodic sweep fails every call whose expiry passed without a terminal
//! response with `TIMEOUT`, and prunes entries whose call was dropped or already
//! finished. This bounds the lifetime of calls a transport lost track of.

use crate::constants::ResultCode;
use crate::execution::call::StreamingCall;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Calls failed with TIMEOUT
    pub expired: usize,
    /// Entries removed because the call was dropped or terminal
    pub pruned: usize,
}

#[derive(Debug, Default)]
pub struct CallTracker {
    calls: DashMap<Uuid, Weak<StreamingCall>>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, call: &Arc<StreamingCall>) {
        self.calls.insert(call.id(), Arc::downgrade(call));
    }

    pub fn deregister(&self, id: &Uuid) {
        self.calls.remove(id);
    }

    /// Number of tracked entries, including ones awaiting pruning
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Fail expired calls and drop finished entries
    pub fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        self.calls.retain(|id, weak| {
            let Some(call) = weak.upgrade() else {
                stats.pruned += 1;
                return false;
            };

            if call.has_completed() {
                stats.pruned += 1;
                return false;
            }

            if call.has_expired() && call.fail_if_not_complete(ResultCode::TIMEOUT) {
                warn!(
                    call_id = %id,
                    method = call.method().path(),
                    iteration = call.iteration(),
                    "⏰ Call expired without a response"
                );
                stats.expired += 1;
                return false;
            }

            true
        });

        if stats.expired > 0 || stats.pruned > 0 {
            debug!(
                expired = stats.expired,
                pruned = stats.pruned,
                remaining = self.calls.len(),
                "Call tracker sweep"
            );
        }
        stats
    }

    /// Run [`CallTracker::sweep`] every `interval` until the tracker is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let tracker = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tracker) = tracker.upgrade() else {
                    debug!("Call tracker dropped, stopping sweeper");
                    break;
                };
                tracker.sweep();
            }
        })
    }
}
