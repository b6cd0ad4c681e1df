use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

/// Liveness check. Does not touch the index.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

/// Index size, active models and conversation length.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let status = state.pipeline.status().await?;
    Ok(Json(json!({
        "started_at": state.started_at.to_rfc3339(),
        "index_backend": state.pipeline.settings().index.backend,
        "pipeline": status,
    })))
}
