//! # Deadline Policy
//!
//! Pure time arithmetic for a command. [`compute_budget`] turns a [`Policy`] into an
//! absolute total deadline plus a per-attempt timeout once, at command start; every
//! later question ("when does this attempt expire?", "is there room for another
//! retry?") is answered against those stored values so repeated queries inside one
//! execution agree with each other.
//!
//! ## Rules
//!
//! - `total > 0`: deadline is `now + total`; an attempt may run for
//!   `min(socket, total)`, or `total` when no socket timeout is set.
//! - `total == 0`, `socket > 0`: no total deadline; each attempt expires after
//!   `socket` and retries are bounded by `max_retries` alone.
//! - neither: nothing expires. Bindings that require an expiry on every call pass a
//!   fallback to [`Budget::attempt_expiry`].

use crate::policy::Policy;
use std::time::Duration;
use tokio::time::Instant;

/// Time budget of one command execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Absolute instant after which no attempt may be running
    pub deadline: Option<Instant>,

    /// Maximum duration of a single attempt
    pub attempt_timeout: Option<Duration>,
}

/// Derive the budget of a command starting at `now`
pub fn compute_budget(policy: &Policy, now: Instant) -> Budget {
    match (policy.total_timeout(), policy.socket_timeout()) {
        (Some(total), socket) => Budget {
            deadline: Some(now + total),
            attempt_timeout: Some(socket.map_or(total, |socket| socket.min(total))),
        },
        (None, Some(socket)) => Budget {
            deadline: None,
            attempt_timeout: Some(socket),
        },
        (None, None) => Budget {
            deadline: None,
            attempt_timeout: None,
        },
    }
}

impl Budget {
    /// Expiry instant of an attempt starting at `now`
    ///
    /// The earliest of the total deadline and `now + attempt_timeout`. When neither is
    /// set the attempt expires at `now + fallback`, or never without a fallback.
    pub fn attempt_expiry(&self, now: Instant, fallback: Option<Duration>) -> Option<Instant> {
        let attempt = self.attempt_timeout.map(|timeout| now + timeout);
        match (self.deadline, attempt) {
            (Some(deadline), Some(attempt)) => Some(deadline.min(attempt)),
            (Some(deadline), None) => Some(deadline),
            (None, Some(attempt)) => Some(attempt),
            (None, None) => fallback.map(|fallback| now + fallback),
        }
    }

    /// Whether another attempt fits: sleeping `sleep` from `now` must still leave
    /// time before the deadline
    pub fn allows_retry(&self, now: Instant, sleep: Duration) -> bool {
        match self.deadline {
            None => true,
            Some(deadline) => now + sleep < deadline,
        }
    }

    /// Time left before the total deadline
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Whether the total deadline has been reached
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}
