use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::rag::types::SourceDocument;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub documents: Vec<SourceDocument>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteDocumentRequest {
    pub source_uri: String,
}

pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<IngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload
        .documents
        .iter()
        .any(|doc| doc.source_uri.trim().is_empty())
    {
        return Err(ApiError::BadRequest(
            "every document needs a non-empty source_uri".to_string(),
        ));
    }

    let report = state.pipeline.ingest(payload.documents).await;
    Ok(Json(report))
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DeleteDocumentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.pipeline.delete_source(&payload.source_uri).await?;
    if removed == 0 {
        return Err(ApiError::NotFound(payload.source_uri));
    }
    Ok(Json(json!({"status": "success", "removed": removed})))
}
