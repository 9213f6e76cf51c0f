//! # Engine Configuration
//!
//! Layered configuration for the execution engine.
//!
//! ## Sources
//!
//! Later sources override earlier ones:
//!
//! 1. Built-in defaults ([`EngineConfig::default`])
//! 2. An optional configuration file (TOML, YAML or JSON, by extension)
//! 3. Environment variables prefixed with `KVS__`, nested with `__`
//!    (for example `KVS__DEFAULT_POLICY__MAX_RETRIES=5`)
//!
//! The merged result is validated before it is returned.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kvs_core::config::EngineConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::load(Some(Path::new("config/kvs.toml")))?;
//! let retries = config.default_policy.max_retries;
//! # Ok(())
//! # }
//! ```

pub mod error;

use crate::constants::defaults;
use crate::policy::{BatchPolicy, Policy};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub use error::{ConfigResult, ConfigurationError};

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "KVS";
/// Separator between prefix and nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Root configuration of the execution engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Policy applied to single-record commands that do not bring their own
    pub default_policy: Policy,

    /// Policy applied to batch commands that do not bring their own
    pub batch_policy: BatchPolicy,

    /// Expiry of proxy calls whose policy sets neither a total nor a socket timeout
    pub fallback_call_timeout_ms: u64,

    /// Interval of the in-flight call expiry sweep
    pub sweep_interval_ms: u64,

    /// Log filter directive used when `RUST_LOG` is not set
    pub log_level: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_policy: Policy::default(),
            batch_policy: BatchPolicy::default(),
            fallback_call_timeout_ms: defaults::FALLBACK_CALL_TIMEOUT_MS,
            sweep_interval_ms: defaults::SWEEP_INTERVAL_MS,
            log_level: None,
        }
    }
}

impl EngineConfig {
    /// Load defaults, then `path` when given, then process environment overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with_environment(path, None)
    }

    /// Load defaults and process environment overrides
    pub fn from_env() -> ConfigResult<Self> {
        Self::load(None)
    }

    /// Load with an explicit set of environment variables instead of the process
    /// environment; useful for testing without modifying global state
    pub fn load_with_environment(
        path: Option<&Path>,
        environment: Option<HashMap<String, String>>,
    ) -> ConfigResult<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::config_file_not_found(path));
            }
            debug!(path = %path.display(), "Loading engine configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(environment),
        );

        let source_name = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string());
        let merged = builder
            .build()
            .map_err(|e| ConfigurationError::load_error(source_name, e))?;

        let config: EngineConfig = merged
            .try_deserialize()
            .map_err(ConfigurationError::deserialization_error)?;
        config.validate()?;

        debug!(
            max_retries = config.default_policy.max_retries,
            total_timeout_ms = config.default_policy.total_timeout_ms,
            fallback_call_timeout_ms = config.fallback_call_timeout_ms,
            "Engine configuration loaded"
        );
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        self.default_policy
            .validate()
            .map_err(|e| ConfigurationError::validation_error(format!("default_policy: {e}")))?;
        self.batch_policy
            .base
            .validate()
            .map_err(|e| ConfigurationError::validation_error(format!("batch_policy: {e}")))?;

        if self.fallback_call_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "fallback_call_timeout_ms",
                self.fallback_call_timeout_ms,
                "must be greater than zero",
            ));
        }

        if self.sweep_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "sweep_interval_ms",
                self.sweep_interval_ms,
                "must be greater than zero",
            ));
        }

        if let Some(level) = &self.log_level {
            tracing_subscriber::EnvFilter::try_new(level).map_err(|e| {
                ConfigurationError::invalid_value("log_level", level, e.to_string())
            })?;
        }

        Ok(())
    }

    pub fn fallback_call_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_call_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = EngineConfig::load_with_environment(None, env(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.fallback_call_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_environment_overrides_nested_fields() {
        let config = EngineConfig::load_with_environment(
            None,
            env(&[
                ("KVS__DEFAULT_POLICY__MAX_RETRIES", "5"),
                ("KVS__BATCH_POLICY__USE_BATCH_DIRECT", "true"),
                ("KVS__SWEEP_INTERVAL_MS", "250"),
            ]),
        )
        .unwrap();

        assert_eq!(config.default_policy.max_retries, 5);
        assert!(config.batch_policy.use_batch_direct);
        assert_eq!(config.sweep_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_validation_rejects_zero_sweep_interval() {
        let error =
            EngineConfig::load_with_environment(None, env(&[("KVS__SWEEP_INTERVAL_MS", "0")]))
                .unwrap_err();
        assert!(matches!(error, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let error = EngineConfig::load_with_environment(
            Some(Path::new("/nonexistent/kvs-engine.toml")),
            env(&[]),
        )
        .unwrap_err();
        assert!(matches!(error, ConfigurationError::ConfigFileNotFound { .. }));
    }
}
