//! HTTP-facing errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mymark_sync_store::StoreError;
use thiserror::Error;

/// Errors returned from request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No user could be resolved from the request.
    #[error("unauthorized")]
    Unauthorized,

    /// The user already has a workspace root.
    #[error("document root already exists")]
    RootExists,

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RootAlreadyExists(_) => ApiError::RootExists,
            other => ApiError::Store(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RootExists => StatusCode::CONFLICT,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}
