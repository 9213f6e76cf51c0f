//! Integration tests for per-operation result handling: exists, read, write and
//! UDF execution, in both listener and future form.

mod common;

use common::{client, key, record, Probe, Reply, ScriptedTransport};
use kvs_core::codec::{DecodedResponse, JsonCodec};
use kvs_core::constants::{udf, ResultCode};
use kvs_core::execution::TransportBinding;
use kvs_core::{Bin, ErrorKind, Policy, UdfCall};
use serde_json::json;
use std::sync::Arc;

fn transport(reply: Reply) -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::always(TransportBinding::Native, reply))
}

#[tokio::test]
async fn test_exists_reports_found_records() {
    let transport = transport(Reply::ok());
    let client = client(&transport);
    let (probe, outcomes) = Probe::new();

    client.exists(None, key(1), probe).await.unwrap();

    assert!(outcomes.single().unwrap());
    assert_eq!(transport.dispatches()[0].request.kind, "exists");
}

#[tokio::test]
async fn test_exists_reports_missing_records_as_false() {
    let transport = transport(Reply::code(ResultCode::KEY_NOT_FOUND_ERROR));
    let client = client(&transport);
    let (probe, outcomes) = Probe::new();

    let report = client.exists(None, key(1), probe).await.unwrap();

    assert!(!outcomes.single().unwrap());
    assert!(report.succeeded);
}

#[tokio::test]
async fn test_exists_filtered_out_depends_on_policy() {
    let transport = transport(Reply::code(ResultCode::FILTERED_OUT));
    let client = client(&transport);

    assert!(client.exists_async(None, key(1)).await.unwrap());

    let strict = Policy::default().with_fail_on_filtered_out(true);
    let error = client.exists_async(Some(&strict), key(1)).await.unwrap_err();
    assert_eq!(error.code(), ResultCode::FILTERED_OUT);
    assert_eq!(error.kind(), ErrorKind::RemoteResultCode(ResultCode::FILTERED_OUT));
}

#[tokio::test]
async fn test_exists_other_codes_fail() {
    let transport = transport(Reply::code(ResultCode::SERVER_ERROR));
    let client = client(&transport);

    let error = client.exists_async(None, key(1)).await.unwrap_err();

    assert_eq!(error.code(), ResultCode::SERVER_ERROR);
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn test_get_returns_record_bins() {
    let transport = transport(Reply::record(&[("name", json!("alice")), ("age", json!(42))]));
    let client = client(&transport);

    let record = client
        .get_async(None, key(1), Some(vec!["name".to_string()]))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(record.get("name"), Some(&json!("alice")));
    assert_eq!(record.get("age"), Some(&json!(42)));
    assert_eq!(record.generation, 1);
    assert_eq!(transport.dispatches()[0].request.kind, "read");
}

#[tokio::test]
async fn test_get_missing_record_is_none_or_error() {
    let transport = transport(Reply::code(ResultCode::KEY_NOT_FOUND_ERROR));
    let client = client(&transport);

    assert!(client.get_async(None, key(1), None).await.unwrap().is_none());

    let error = client
        .get_required_async(None, key(1), None)
        .await
        .unwrap_err();
    assert_eq!(error.code(), ResultCode::KEY_NOT_FOUND_ERROR);
    assert_eq!(error.node(), Some("A"));
}

#[tokio::test]
async fn test_put_acknowledges_writes() {
    let transport = transport(Reply::ok());
    let client = client(&transport);

    client
        .put_async(None, key(7), vec![Bin::new("name", "bob")])
        .await
        .unwrap();

    let dispatch = &transport.dispatches()[0];
    assert_eq!(dispatch.request.kind, "write");
    assert_eq!(dispatch.request.keys, vec![key(7)]);
}

#[tokio::test]
async fn test_put_failure_carries_policy_and_node() {
    let transport = transport(Reply::code(ResultCode::GENERATION_ERROR));
    let client = client(&transport);
    let (probe, outcomes) = Probe::new();

    client
        .put(None, key(7), vec![Bin::new("name", "bob")], probe)
        .await
        .unwrap();

    let error = outcomes.single().unwrap_err();
    assert_eq!(error.code(), ResultCode::GENERATION_ERROR);
    assert_eq!(error.iteration(), 1);
    assert_eq!(error.node(), Some("A"));
    assert_eq!(error.policy().map(|p| p.as_ref()), Some(client.default_policy()));
}

#[tokio::test]
async fn test_execute_returns_udf_success_value() {
    let transport = transport(Reply::record(&[(udf::SUCCESS_BIN, json!({"count": 3}))]));
    let client = client(&transport);

    let value = client
        .execute_async(None, key(1), UdfCall::new("counters", "increment", vec![json!(1)]))
        .await
        .unwrap();

    assert_eq!(value, Some(json!({"count": 3})));
    assert_eq!(transport.dispatches()[0].request.kind, "execute");
}

#[tokio::test]
async fn test_execute_null_success_is_none() {
    let transport = transport(Reply::record(&[(udf::SUCCESS_BIN, json!(null))]));
    let client = client(&transport);

    let value = client
        .execute_async(None, key(1), UdfCall::new("counters", "reset", Vec::new()))
        .await
        .unwrap();

    assert_eq!(value, None);
}

#[tokio::test]
async fn test_execute_failure_bin_is_udf_error() {
    let transport = transport(Reply::record(&[(udf::FAILURE_BIN, json!("bad argument"))]));
    let client = client(&transport);

    let error = client
        .execute_async(None, key(1), UdfCall::new("counters", "increment", Vec::new()))
        .await
        .unwrap_err();

    assert_eq!(error.code(), ResultCode::UDF_BAD_RESPONSE);
    assert_eq!(error.message(), "bad argument");
}

#[tokio::test]
async fn test_execute_without_result_bins_is_invalid() {
    let transport = transport(Reply::record(&[("other", json!(1))]));
    let client = client(&transport);

    let error = client
        .execute_async(None, key(1), UdfCall::new("counters", "increment", Vec::new()))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Client);
    assert_eq!(error.code(), ResultCode::UDF_BAD_RESPONSE);
}

#[tokio::test]
async fn test_unary_call_completes_on_first_frame() {
    let first = JsonCodec::partial_frame(&DecodedResponse::with_record(record(&[(
        "name",
        json!("first"),
    )])))
    .unwrap();
    let second = JsonCodec::response_frame(&DecodedResponse::with_record(record(&[(
        "name",
        json!("second"),
    )])))
    .unwrap();
    let transport = transport(Reply::Frames(vec![first, second]));
    let client = client(&transport);

    let record = client.get_async(None, key(1), None).await.unwrap().unwrap();

    // Single-record reads are unary; a trailing frame is dropped.
    assert_eq!(record.get("name"), Some(&json!("first")));
    assert!(transport.calls()[0].has_completed());
}
