//! Error types for accessmap-ai
//!
//! Service errors are mapped onto HTTP responses here; handlers return
//! [`ApiResult`] and use `?` on service calls.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::extractors::ExtractionError;
use crate::services::{MaintenanceError, QueryError, ResolutionError, SubmissionError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Image could not be interpreted (400)
    #[error("Unreadable image: {0}")]
    UnreadableImage(String),

    /// Inference backend unavailable (503)
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Inference deadline exceeded (504)
    #[error("Extraction timed out: {0}")]
    Timeout(String),

    /// Request abandoned before completion (408)
    #[error("Request cancelled")]
    Cancelled,

    /// Observation store failed after retry (500)
    #[error("Store failure: {0}")]
    StoreFailure(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// accessmap-common error
    #[error("Common error: {0}")]
    Common(#[from] accessmap_common::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::UnreadableImage(_) => StatusCode::BAD_REQUEST,
            ApiError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            ApiError::StoreFailure(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Common(accessmap_common::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Common(accessmap_common::Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Common(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::UnreadableImage(_) => "UNREADABLE_IMAGE",
            ApiError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            ApiError::Timeout(_) => "TIMEOUT",
            ApiError::Cancelled => "CANCELLED",
            ApiError::StoreFailure(_) => "STORE_FAILURE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Common(_) => "COMMON_ERROR",
        }
    }
}

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::Unreadable(msg) => ApiError::UnreadableImage(msg),
            ExtractionError::ModelUnavailable(msg) => ApiError::ModelUnavailable(msg),
            ExtractionError::Timeout { .. } => ApiError::Timeout(err.to_string()),
            ExtractionError::Cancelled => ApiError::Cancelled,
        }
    }
}

impl From<ResolutionError> for ApiError {
    fn from(err: ResolutionError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            SubmissionError::Resolution(e) => e.into(),
            SubmissionError::Extraction(e) => e.into(),
            SubmissionError::Store(e) => ApiError::StoreFailure(e.to_string()),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::NotFound(id) => ApiError::NotFound(format!("entrance {}", id)),
            QueryError::Store(e) => ApiError::Common(e),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<MaintenanceError> for ApiError {
    fn from(err: MaintenanceError) -> Self {
        match err {
            MaintenanceError::NotFound(msg) => ApiError::NotFound(msg),
            MaintenanceError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            MaintenanceError::Store(e) => ApiError::StoreFailure(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
