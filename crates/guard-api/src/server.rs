//! Axum server and routes.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use guard_core::{
    AuditListOptions, ComplianceStandard, GuardError, MutationGuard, MutationRequest, Operation,
    UndoError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub guard: Arc<MutationGuard>,
}

/// Response envelope shared by every JSON route.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T>(data: T) -> ApiResult<T> {
    (
        StatusCode::OK,
        Json(ApiResponse {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
        }),
    )
}

fn fail<T>(status: StatusCode, message: String) -> ApiResult<T> {
    (
        status,
        Json(ApiResponse {
            code: status.as_u16(),
            message,
            data: None,
        }),
    )
}

fn status_for(err: &GuardError) -> StatusCode {
    match err {
        GuardError::Input(_) => StatusCode::BAD_REQUEST,
        GuardError::Gate(_) => StatusCode::CONFLICT,
        GuardError::Remote(_) => StatusCode::BAD_GATEWAY,
        GuardError::Undo(UndoError::NotFound(_)) => StatusCode::NOT_FOUND,
        GuardError::Undo(UndoError::Expired { .. }) => StatusCode::GONE,
        GuardError::Undo(UndoError::InvalidReversal(_) | UndoError::NonReversible { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        GuardError::Undo(UndoError::Failed(_)) => StatusCode::BAD_GATEWAY,
        GuardError::Audit(_) | GuardError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn from_error<T>(err: GuardError) -> ApiResult<T> {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    fail(status, err.to_string())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mutations", post(handle_mutation))
        .route("/transactions/:id", get(handle_transaction))
        .route("/transactions/:id/undo", post(handle_undo))
        .route("/audit", get(handle_audit_list))
        .route("/audit/report", get(handle_report))
        .route("/audit/verify", get(handle_verify))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `POST /mutations` body: the request plus the mandatory dry-run flag.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationBody {
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(flatten)]
    pub request: MutationRequest,
}

async fn handle_mutation(
    State(state): State<Arc<AppState>>,
    body: Result<Json<MutationBody>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return fail(StatusCode::BAD_REQUEST, e.body_text()),
    };
    match state.guard.perform(&body.request, body.dry_run).await {
        Ok(res) => ok(serde_json::to_value(res).unwrap_or(Value::Null)),
        Err(e) => from_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoBody {
    #[serde(default)]
    pub auth_context: Option<Value>,
}

async fn handle_undo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Value> {
    let body: UndoBody = if body.iter().all(u8::is_ascii_whitespace) {
        UndoBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(b) => b,
            Err(e) => return fail(StatusCode::BAD_REQUEST, format!("invalid undo body: {}", e)),
        }
    };
    match state.guard.undo(&id, body.auth_context).await {
        Ok(outcome) => ok(serde_json::to_value(outcome).unwrap_or(Value::Null)),
        Err(e) => from_error(e),
    }
}

async fn handle_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    match state.guard.transaction(&id).await {
        Ok(Some(entry)) => ok(serde_json::to_value(entry).unwrap_or(Value::Null)),
        Ok(None) => fail(StatusCode::NOT_FOUND, format!("transaction not found: {}", id)),
        Err(e) => from_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditListQuery {
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub operation: Option<Operation>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

async fn handle_audit_list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AuditListQuery>,
) -> ApiResult<Value> {
    let opts = AuditListOptions {
        table_id: q.table_id,
        operation: q.operation,
        since: q.since,
        limit: q.limit,
        offset: q.offset,
    };
    match state.guard.history(&opts).await {
        Ok(entries) => ok(serde_json::to_value(entries).unwrap_or(Value::Null)),
        Err(e) => from_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub standard: Option<String>,
}

async fn handle_report(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ReportQuery>,
) -> ApiResult<Value> {
    let standard: ComplianceStandard = match q.standard.as_deref().map(str::parse) {
        Some(Ok(s)) => s,
        Some(Err(msg)) => return fail(StatusCode::BAD_REQUEST, msg),
        None => {
            return fail(
                StatusCode::BAD_REQUEST,
                "standard is required (SOC2 or GDPR)".to_string(),
            )
        }
    };
    match state.guard.generate_report(standard).await {
        Ok(report) => ok(serde_json::to_value(report).unwrap_or(Value::Null)),
        Err(e) => from_error(e),
    }
}

async fn handle_verify(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    match state.guard.verify_audit().await {
        Ok(report) => ok(serde_json::to_value(report).unwrap_or(Value::Null)),
        Err(e) => from_error(e),
    }
}

async fn handle_health() -> &'static str {
    "ok"
}
