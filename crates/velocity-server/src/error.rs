//! HTTP-facing errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;
use velocity_core::StoreError;

/// Errors returned by the REST and upgrade handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The stream does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The stream exists but has been closed.
    #[error("{0}")]
    Gone(String),

    /// The request conflicts with the stream's state.
    #[error("{0}")]
    BadRequest(String),

    /// A collaborator failed.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Gone(_) => StatusCode::GONE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        error!(error = %err, "store call failed");
        match err {
            StoreError::NotFound(_) => Self::NotFound("Stream not found".into()),
            StoreError::Backend(_) | StoreError::Timeout(_) => {
                Self::Internal("Internal server error".into())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
