//! API error types for legis-ingest

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404), e.g. cancelling when no run is active
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400), e.g. an unknown document type filter
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. a run is already in progress
    #[error("Conflict: {0}")]
    Conflict(String),

    /// legis-common error surfacing through a handler (500)
    #[error("Pipeline error: {0}")]
    Common(#[from] legis_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PIPELINE_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
