use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Failure of the embedding stage for a single text or batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    #[error("input {index} exceeds the token limit ({tokens} > {limit})")]
    TooLong {
        index: usize,
        tokens: usize,
        limit: usize,
    },
    #[error("embedding backend returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedding backend returned a {got}-dim vector, expected {expected}")]
    Dimension { expected: usize, got: usize },
    #[error("embedding backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("corrupt index entry {chunk_id}: {reason}")]
    Corrupt { chunk_id: String, reason: String },
    #[error("entry {chunk_id} carries a vector for chunk {vector_chunk_id}")]
    DanglingVector {
        chunk_id: String,
        vector_chunk_id: String,
    },
    #[error("index storage error: {0}")]
    Storage(String),
}

impl IndexError {
    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        IndexError::Storage(err.to_string())
    }
}

/// Errors surfaced by the retrieval-and-grounding pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("prompt too large: ~{estimated_tokens} tokens exceeds the limit of {limit}")]
    PromptTooLarge {
        estimated_tokens: usize,
        limit: usize,
    },
    #[error("generation failed: {0}")]
    Generation(#[source] anyhow::Error),
}

impl RagError {
    pub fn config(message: impl Into<String>) -> Self {
        RagError::Config(message.into())
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("upstream error: {0}")]
    BadGateway(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Config(msg) => ApiError::BadRequest(msg),
            RagError::PromptTooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            RagError::Embedding(_) | RagError::Generation(_) => {
                ApiError::BadGateway(err.to_string())
            }
            RagError::Index(inner) => ApiError::Internal(inner.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
