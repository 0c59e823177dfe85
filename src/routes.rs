//! HTTP surface: the webhook receiver and the operator endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::conversation::{OutreachRequest, Workflow};
use crate::error::{DirectoryError, FlowError};
use crate::events::{Envelope, Reconciler};

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub workflow: Arc<Workflow>,
}

/// POST /webhook
///
/// Always answers 200 with the outcome; the platform does not retry on
/// errors anyway.
async fn webhook(State(state): State<AppState>, Json(envelope): Json<Envelope>) -> impl IntoResponse {
    Json(state.reconciler.handle(envelope).await)
}

/// POST /api/controls/audit
async fn audit(State(state): State<AppState>) -> Response {
    match state.workflow.audit().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct PendenciesBody {
    pendencies: bool,
}

/// PUT /api/controls/{contact_id}/pendencies
async fn set_pendencies(
    State(state): State<AppState>,
    Path(contact_id): Path<String>,
    Json(body): Json<PendenciesBody>,
) -> Response {
    match state
        .workflow
        .set_pendencies(&contact_id, body.pendencies)
        .await
    {
        Ok(()) => Json(json!({"contact_id": contact_id, "pendencies": body.pendencies}))
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct OutreachQuery {
    cnpj: String,
}

/// POST /api/outreach?cnpj=...
async fn outreach(
    State(state): State<AppState>,
    Query(query): Query<OutreachQuery>,
    Json(request): Json<OutreachRequest>,
) -> Response {
    match state.workflow.outreach(&query.cnpj, &request).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/outreach/groupings/send
///
/// Queues every unsent grouping; answers 200 with a zero count when there
/// is nothing to send.
async fn send_groupings(State(state): State<AppState>) -> Response {
    match state.workflow.send_groupings().await {
        Ok(queued) => Json(json!({"queued": queued})).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

fn status_for(error: &FlowError) -> StatusCode {
    match error {
        FlowError::NotFound { .. } | FlowError::Directory(DirectoryError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        FlowError::Validation(_) => StatusCode::BAD_REQUEST,
        FlowError::Duplicate(_) => StatusCode::CONFLICT,
        FlowError::UpstreamRequest(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: FlowError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!(error = %error, "Request failed");
    }
    (status, Json(json!({"error": error.to_string()}))).into_response()
}

/// Build the application router.
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/api/controls/audit", post(audit))
        .route("/api/controls/{contact_id}/pendencies", put(set_pendencies))
        .route("/api/outreach", post(outreach))
        .route("/api/outreach/groupings/send", post(send_groupings))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
