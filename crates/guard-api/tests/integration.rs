//! Integration tests: dry-run/execute, gate rejections, undo, audit queries.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use guard_api::server::{self, AppState};
use guard_audit::InMemoryAuditStore;
use guard_core::{FieldSchema, FieldType, ManualClock, MutationGuard, TableSchema};
use guard_remote::MockRecordApi;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

struct TestApp {
    app: axum::Router,
    api: Arc<MockRecordApi>,
    clock: Arc<ManualClock>,
}

async fn test_app() -> TestApp {
    let api = Arc::new(MockRecordApi::new());
    api.add_table(TableSchema {
        id: "users".to_string(),
        name: "Users".to_string(),
        fields: vec![
            FieldSchema {
                name: "name".to_string(),
                field_type: FieldType::SingleLineText,
                required: true,
            },
            FieldSchema {
                name: "email".to_string(),
                field_type: FieldType::Email,
                required: false,
            },
        ],
    })
    .await;
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let guard = MutationGuard::builder(api.clone(), Arc::new(InMemoryAuditStore::new()))
        .with_clock(clock.clone())
        .build();
    let state = Arc::new(AppState {
        guard: Arc::new(guard),
    });
    TestApp {
        app: server::router(state),
        api,
        clock,
    }
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let j: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, j)
}

fn create_body(dry_run: bool) -> Value {
    json!({
        "dryRun": dry_run,
        "operation": "create",
        "tableId": "users",
        "payload": { "name": "Ada", "email": "ada@example.com" }
    })
}

#[tokio::test]
async fn dry_run_then_execute_then_undo() {
    let t = test_app().await;
    let (status, j) = send(&t.app, "POST", "/mutations", Some(create_body(true))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["mode"], "dry_run");
    assert_eq!(j["data"]["validated"], true);
    assert_eq!(j["data"]["checks"]["schema"], true);
    assert!(t.api.mutation_calls().await.is_empty());

    let (status, j) = send(&t.app, "POST", "/mutations", Some(create_body(false))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["code"], 200);
    assert_eq!(j["data"]["mode"], "executed");
    let txn = j["data"]["transactionId"].as_str().unwrap().to_string();
    assert_eq!(t.api.records("users").await.len(), 1);

    let (status, j) = send(&t.app, "GET", &format!("/transactions/{}", txn), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["reversalInstructions"]["kind"], "replay");
    assert_eq!(j["data"]["reversalInstructions"]["operation"], "delete");

    let (status, j) = send(
        &t.app,
        "POST",
        &format!("/transactions/{}/undo", txn),
        Some(json!({ "authContext": { "user": "ops" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["success"], true);
    assert_eq!(j["data"]["undoOperation"], "delete");
    assert!(t.api.records("users").await.is_empty());

    let undo_id = j["data"]["undoTransactionId"].as_str().unwrap().to_string();
    let (status, j) = send(&t.app, "POST", &format!("/transactions/{}/undo", undo_id), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(j["code"], 422);
}

#[tokio::test]
async fn missing_dry_run_flag_is_bad_request() {
    let t = test_app().await;
    let mut body = create_body(true);
    body.as_object_mut().unwrap().remove("dryRun");
    let (status, j) = send(&t.app, "POST", "/mutations", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(j["code"], 400);
    assert!(j["message"].as_str().unwrap().contains("dryRun"));
    assert!(t.api.calls().await.is_empty());
}

#[tokio::test]
async fn execute_without_dry_run_conflicts() {
    let t = test_app().await;
    let (status, j) = send(&t.app, "POST", "/mutations", Some(create_body(false))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(j["message"].as_str().unwrap().contains("no dry-run found"));
    assert!(t.api.mutation_calls().await.is_empty());
}

#[tokio::test]
async fn failed_validation_is_a_verdict_then_blocks_execute() {
    let t = test_app().await;
    let body = json!({
        "dryRun": true,
        "operation": "create",
        "tableId": "users",
        "payload": { "nickname": "A" }
    });
    let (status, j) = send(&t.app, "POST", "/mutations", Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["validated"], false);
    assert_eq!(j["data"]["errors"].as_array().unwrap().len(), 2);

    let mut execute = body;
    execute["dryRun"] = json!(false);
    let (status, j) = send(&t.app, "POST", "/mutations", Some(execute)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(j["message"].as_str().unwrap().contains("cannot execute"));
}

#[tokio::test]
async fn undo_errors_map_to_statuses() {
    let t = test_app().await;
    let (status, _) = send(&t.app, "POST", "/transactions/not-an-id/undo", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(
        &t.app,
        "POST",
        "/transactions/audit-1700000000000-deadbeef/undo",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&t.app, "POST", "/mutations", Some(create_body(true))).await;
    let (_, j) = send(&t.app, "POST", "/mutations", Some(create_body(false))).await;
    let txn = j["data"]["transactionId"].as_str().unwrap().to_string();
    t.clock.advance(Duration::days(31));
    let (status, j) = send(&t.app, "POST", &format!("/transactions/{}/undo", txn), None).await;
    assert_eq!(status, StatusCode::GONE);
    assert!(j["message"].as_str().unwrap().contains("expired"));
}

#[tokio::test]
async fn audit_list_report_and_verify() {
    let t = test_app().await;
    for _ in 0..2 {
        send(&t.app, "POST", "/mutations", Some(create_body(true))).await;
        send(&t.app, "POST", "/mutations", Some(create_body(false))).await;
    }

    let (status, j) = send(&t.app, "GET", "/audit?table_id=users&operation=create&limit=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"].as_array().unwrap().len(), 1);

    let (status, j) = send(&t.app, "GET", "/audit/report?standard=gdpr", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["standard"], "GDPR");
    assert_eq!(j["data"]["totalOperations"], 2);
    assert_eq!(j["data"]["personalData"].as_array().unwrap().len(), 2);

    let (status, _) = send(&t.app, "GET", "/audit/report?standard=HIPAA", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, j) = send(&t.app, "GET", "/audit/verify", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["data"]["total"], 2);
    assert_eq!(j["data"]["valid"], 2);
}

#[tokio::test]
async fn health() {
    let t = test_app().await;
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let res = t.app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}
