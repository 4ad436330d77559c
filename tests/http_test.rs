//! HTTP routes over the mock driver.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{ENDPOINT, MockDriver, MockState};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use sql_gateway::config::PoolSettings;
use sql_gateway::db::{ColumnInfo, PoolRegistry, RowSet};
use sql_gateway::gateway::Gateway;
use sql_gateway::models::ExecutionSummary;
use sql_gateway::transport::router;
use std::sync::Arc;
use tower::ServiceExt;

fn app(max_body_bytes: usize) -> (axum::Router, Arc<MockState>) {
    let driver = MockDriver::new();
    let state = Arc::clone(&driver.state);
    let registry = PoolRegistry::new(driver, PoolSettings::default());
    (router(Arc::new(Gateway::new(registry)), max_body_bytes), state)
}

async fn send(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_select_route() {
    let (app, state) = app(1024 * 1024);
    state.set_query_result(RowSet::new(
        vec![json!({"n": 1}).as_object().cloned().unwrap()],
        vec![ColumnInfo::new("n", 8, false)],
    ));

    let (status, body) = send(
        app,
        "POST",
        "/query/select",
        Some(json!({
            "endpoint": ENDPOINT,
            "user": "alice",
            "password": "secret",
            "sql": "SELECT 1 AS n",
            "limit": 5
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "rows": [{"n": 1}],
            "fields": [{"name": "n", "type": "LONGLONG", "nullable": false}],
            "summary": null
        })
    );
    assert_eq!(state.last_statement().unwrap().sql, "SELECT 1 AS n LIMIT 5");
}

#[tokio::test]
async fn test_write_route() {
    let (app, state) = app(1024 * 1024);
    state.set_execute_result(ExecutionSummary::new(2, 0));

    let (status, body) = send(
        app,
        "POST",
        "/query/write",
        Some(json!({
            "endpoint": ENDPOINT,
            "user": "alice",
            "sql": "UPDATE t SET a = ? WHERE b = ?",
            "params": ["x", null]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], json!({"affectedRows": 2, "insertId": 0}));
    assert_eq!(state.commits(), 1);
}

#[tokio::test]
async fn test_invalid_endpoint_is_bad_request() {
    let (app, state) = app(1024 * 1024);

    let (status, body) = send(
        app,
        "POST",
        "/query/select",
        Some(json!({
            "endpoint": "mysql://db.test/shop",
            "user": "alice",
            "sql": "SELECT 1"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("port"));
    assert_eq!(state.pools_created(), 0);
}

#[tokio::test]
async fn test_missing_credentials_are_bad_request() {
    let (app, _state) = app(1024 * 1024);

    let (status, body) = send(
        app,
        "POST",
        "/procedure",
        Some(json!({"endpoint": ENDPOINT, "user": "  ", "sql": "CALL p()"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid input: user is required");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let (app, _state) = app(1024 * 1024);

    let (status, body) = send(
        app,
        "POST",
        "/query/select",
        Some(json!({"endpoint": ENDPOINT, "user": "alice"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_raw_procedure_rejects_params() {
    let (app, state) = app(1024 * 1024);

    let (status, _body) = send(
        app,
        "POST",
        "/procedure/raw",
        Some(json!({
            "endpoint": ENDPOINT,
            "user": "alice",
            "sql": "CALL p(?)",
            "params": [1]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(state.leases(), 0);
}

#[tokio::test]
async fn test_transient_failure_is_service_unavailable() {
    let (app, state) = app(1024 * 1024);
    state.fail_next_ping(common::reset_error());
    state.fail_next_ping(common::reset_error());

    let (status, body) = send(
        app,
        "POST",
        "/procedure/raw",
        Some(json!({"endpoint": ENDPOINT, "user": "alice", "sql": "CALL p()"})),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("ECONNRESET"));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (app, state) = app(64);

    let (status, _body) = send(
        app,
        "POST",
        "/query/select",
        Some(json!({
            "endpoint": ENDPOINT,
            "user": "alice",
            "sql": format!("SELECT '{}'", "x".repeat(256))
        })),
    )
    .await;

    assert!(status.is_client_error());
    assert_eq!(state.leases(), 0);
}

#[tokio::test]
async fn test_health_reports_pool_count() {
    let (app, _state) = app(1024 * 1024);

    let (status, body) = send(app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "pools": 0}));
}
