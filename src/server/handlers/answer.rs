use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::rag::IndexFilter;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub query: String,
    /// Restrict retrieval to one ingested source.
    #[serde(default)]
    pub source_uri: Option<String>,
}

pub async fn answer(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let query = payload.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let filter = payload.source_uri.as_deref().map(IndexFilter::source);
    let answer = state.pipeline.answer_within(query, filter.as_ref()).await?;
    Ok(Json(answer))
}

pub async fn clear_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.pipeline.clear_history();
    Json(json!({"status": "success"}))
}
