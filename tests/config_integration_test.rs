//! Integration tests for layered engine configuration and its use by the client.

mod common;

use common::{client_with, key, single_node_router, Reply, ScriptedTransport};
use kvs_core::config::{ConfigurationError, EngineConfig};
use kvs_core::execution::{StatusCode, TransportBinding};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn config_file(extension: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(extension)
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn env(vars: &[(&str, &str)]) -> Option<HashMap<String, String>> {
    Some(
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

const ENGINE_TOML: &str = r#"
fallback_call_timeout_ms = 2500
log_level = "kvs_core=debug"

[default_policy]
total_timeout_ms = 750
max_retries = 4
sleep_between_retries_ms = 5

[batch_policy]
total_timeout_ms = 3000
use_batch_direct = true
"#;

#[test]
fn test_file_values_override_defaults() {
    let file = config_file(".toml", ENGINE_TOML);

    let config = EngineConfig::load_with_environment(Some(file.path()), env(&[])).unwrap();

    assert_eq!(config.default_policy.total_timeout_ms, 750);
    assert_eq!(config.default_policy.max_retries, 4);
    assert_eq!(config.default_policy.sleep_between_retries_ms, 5);
    // Unset fields keep their defaults.
    assert_eq!(
        config.default_policy.socket_timeout_ms,
        EngineConfig::default().default_policy.socket_timeout_ms
    );
    assert_eq!(config.batch_policy.base.total_timeout_ms, 3000);
    assert!(config.batch_policy.use_batch_direct);
    assert_eq!(config.fallback_call_timeout(), Duration::from_millis(2500));
    assert_eq!(config.log_level.as_deref(), Some("kvs_core=debug"));
}

#[test]
fn test_environment_overrides_file() {
    let file = config_file(".toml", ENGINE_TOML);

    let config = EngineConfig::load_with_environment(
        Some(file.path()),
        env(&[
            ("KVS__DEFAULT_POLICY__MAX_RETRIES", "1"),
            ("KVS__FALLBACK_CALL_TIMEOUT_MS", "900"),
        ]),
    )
    .unwrap();

    assert_eq!(config.default_policy.max_retries, 1);
    assert_eq!(config.default_policy.total_timeout_ms, 750);
    assert_eq!(config.fallback_call_timeout_ms, 900);
}

#[test]
fn test_yaml_files_are_supported() {
    let file = config_file(
        ".yaml",
        "default_policy:\n  max_retries: 7\nsweep_interval_ms: 40\n",
    );

    let config = EngineConfig::load_with_environment(Some(file.path()), env(&[])).unwrap();

    assert_eq!(config.default_policy.max_retries, 7);
    assert_eq!(config.sweep_interval(), Duration::from_millis(40));
}

#[test]
fn test_invalid_values_are_rejected() {
    let file = config_file(".toml", "fallback_call_timeout_ms = 0\n");

    let error = EngineConfig::load_with_environment(Some(file.path()), env(&[])).unwrap_err();
    assert!(matches!(
        error,
        ConfigurationError::InvalidValue { ref field, .. } if field == "fallback_call_timeout_ms"
    ));
}

#[test]
fn test_malformed_file_is_a_load_error() {
    let file = config_file(".toml", "default_policy = [not toml");

    let error = EngineConfig::load_with_environment(Some(file.path()), env(&[])).unwrap_err();
    assert!(matches!(error, ConfigurationError::LoadError { .. }));
}

#[test]
fn test_mistyped_values_are_a_deserialization_error() {
    let error = EngineConfig::load_with_environment(
        None,
        env(&[("KVS__DEFAULT_POLICY__MAX_RETRIES", "many")]),
    )
    .unwrap_err();
    assert!(matches!(
        error,
        ConfigurationError::DeserializationError { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_client_uses_configured_default_policy() {
    let file = config_file(".toml", ENGINE_TOML);
    let config = EngineConfig::load_with_environment(Some(file.path()), env(&[])).unwrap();
    let transport = Arc::new(ScriptedTransport::always(
        TransportBinding::Native,
        Reply::Status(StatusCode::Unavailable),
    ));
    let client = client_with(&transport, single_node_router(), config);

    let error = client.exists_async(None, key(1)).await.unwrap_err();

    // max_retries = 4 from the file
    assert_eq!(transport.attempts(), 5);
    assert!(error.retries_exhausted());
    assert_eq!(client.default_policy().total_timeout_ms, 750);
}
