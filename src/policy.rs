//! # Command Policies
//!
//! Immutable per-command configuration. Policies are created by the caller (or taken
//! from [`EngineConfig`](crate::config::EngineConfig) defaults), wrapped in an `Arc`
//! and shared read-only by every attempt of a command.

use crate::constants::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout and retry settings for a single command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Total budget for the command across all attempts; 0 means no total deadline
    pub total_timeout_ms: u64,

    /// Budget for a single attempt; 0 means attempts only expire with the total deadline
    pub socket_timeout_ms: u64,

    /// Retries allowed after the initial attempt
    pub max_retries: u32,

    /// Delay before the next attempt is sent
    pub sleep_between_retries_ms: u64,

    /// Report FILTERED_OUT as a failure instead of a success-shaped outcome
    pub fail_on_filtered_out: bool,
}

impl Policy {
    pub fn total_timeout(&self) -> Option<Duration> {
        (self.total_timeout_ms > 0).then(|| Duration::from_millis(self.total_timeout_ms))
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        (self.socket_timeout_ms > 0).then(|| Duration::from_millis(self.socket_timeout_ms))
    }

    pub fn sleep_between_retries(&self) -> Duration {
        Duration::from_millis(self.sleep_between_retries_ms)
    }

    /// Builder style override of the total timeout
    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder style override of the socket timeout
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder style override of the retry settings
    pub fn with_retries(mut self, max_retries: u32, sleep_between_retries: Duration) -> Self {
        self.max_retries = max_retries;
        self.sleep_between_retries_ms = sleep_between_retries.as_millis() as u64;
        self
    }

    pub fn with_fail_on_filtered_out(mut self, fail: bool) -> Self {
        self.fail_on_filtered_out = fail;
        self
    }

    /// Validate policy parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 100 {
            return Err("max_retries should not exceed 100".to_string());
        }

        if self.total_timeout_ms > 0 && self.sleep_between_retries_ms >= self.total_timeout_ms {
            return Err(
                "sleep_between_retries_ms must be smaller than total_timeout_ms".to_string(),
            );
        }

        Ok(())
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            total_timeout_ms: defaults::TOTAL_TIMEOUT_MS,
            socket_timeout_ms: defaults::SOCKET_TIMEOUT_MS,
            max_retries: defaults::MAX_RETRIES,
            sleep_between_retries_ms: defaults::SLEEP_BETWEEN_RETRIES_MS,
            fail_on_filtered_out: false,
        }
    }
}

/// Policy for multi-key batch commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPolicy {
    /// Timeout and retry settings applied to every sub-batch
    #[serde(flatten)]
    pub base: Policy,

    /// Force the legacy one-namespace-per-call protocol even on nodes that
    /// support consolidated batches
    pub use_batch_direct: bool,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            base: Policy {
                total_timeout_ms: defaults::BATCH_TOTAL_TIMEOUT_MS,
                max_retries: 0,
                ..Policy::default()
            },
            use_batch_direct: false,
        }
    }
}
