//! Operational surface: health, stats, and the remark admin endpoint.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::RelayError;
use crate::server::AppState;

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let queue = state.queue.snapshot();
    Json(json!({
        "status": "ok",
        "queue": queue,
        "config": {
            "maxConcurrent": queue.concurrency,
            "perTokenConcurrency": state.config.concurrency.per_token_concurrency,
            "queueLimit": state.config.concurrency.queue_limit,
            "timeout": state.config.concurrency.timeout,
        },
    }))
}

pub async fn handle_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.get_all_stats())
}

#[derive(Debug, Deserialize)]
pub struct RemarkRequest {
    pub index: usize,
    #[serde(default)]
    pub remark: String,
}

pub async fn handle_update_remark(
    State(state): State<AppState>,
    Json(request): Json<RemarkRequest>,
) -> Response {
    match state.store.update_remark(request.index, &request.remark).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => RelayError::Validation(e).into_response(),
    }
}
