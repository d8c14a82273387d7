use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use promtail_config_lib::{Handler, Key, Result, Workload};
use tracing::warn;

use super::state::AppState;

// ── Health ───────────────────────────────────────────────────

pub async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "snippets": state.handler.len(),
        "state": state.handler.state(),
        "last_report": state.handler.last_report(),
    }))
}

// ── GET /v1/document ─────────────────────────────────────────

pub async fn handle_document(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain")],
        state.handler.render(),
    )
        .into_response()
}

// ── PUT /v1/workloads ────────────────────────────────────────

pub async fn handle_put_workload(
    State(state): State<Arc<AppState>>,
    Json(workload): Json<Workload>,
) -> Response {
    workload_response(&workload, state.resource.ensure_created(&workload).await)
}

// ── DELETE /v1/workloads ─────────────────────────────────────

pub async fn handle_delete_workload(
    State(state): State<Arc<AppState>>,
    Json(workload): Json<Workload>,
) -> Response {
    workload_response(&workload, state.resource.ensure_deleted(&workload).await)
}

fn workload_response(workload: &Workload, result: Result<Option<Key>>) -> Response {
    match result {
        Ok(Some(key)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "key": key.to_string() })),
        )
            .into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(
                namespace = %workload.namespace,
                workload = %workload.name,
                error = %e,
                "Skipping workload"
            );
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
