use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the streaming RAG pipeline and its HTTP surface.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    /// More than one metadata row matched a `(user_id, thread_id)` pair.
    /// Data-integrity fault; never retried, never silently resolved.
    #[error("duplicate thread id: {0}")]
    DuplicateThread(String),
    /// The remote connection no longer exists. Terminal for the current
    /// work item but expected; not a processing failure.
    #[error("connection gone")]
    Gone,
    #[error("transient failure: {0}")]
    Transient(String),
    /// The generation stream was exhausted without an explicit stop signal.
    #[error("generation stream ended without stop signal")]
    GenerationIncomplete,
    #[error("input from unknown connection: {0}")]
    UnknownConnection(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, ApiError::Gone)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Gone => (StatusCode::GONE, "Connection gone".to_string()),
            ApiError::Transient(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::DuplicateThread(_)
            | ApiError::GenerationIncomplete
            | ApiError::UnknownConnection(_)
            | ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
