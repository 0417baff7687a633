use crate::services::{catalog_service::CatalogError, chunk_store::StoreError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// An error bound for the HTTP boundary: a status, a short client-facing
/// error string and an optional diagnostic message.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub error: String,
    pub message: Option<String>,
}

impl AppError {
    /// Create a new AppError with a specific status and error string.
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: None,
        }
    }

    /// Attach diagnostic detail, rendered as `message` in the body.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.error, message),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match self.message {
            Some(message) => json!({ "error": self.error, "message": message }),
            None => json!({ "error": self.error }),
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::not_found("Video not found"),
            StoreError::InvalidRange { .. } => {
                AppError::bad_request("Invalid range").with_message(err.to_string())
            }
            other => {
                tracing::error!(error = %other, detail = ?other, "storage failure");
                AppError::internal("Failed to stream video")
            }
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(_) => AppError::not_found("Video not found"),
            CatalogError::UnknownField(_) => AppError::bad_request(err.to_string()),
            other => {
                tracing::error!(error = %other, detail = ?other, "catalog failure");
                AppError::internal("Failed to fetch videos")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "unexpected failure");
        AppError::internal("Internal server error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn store_errors_map_to_statuses() {
        assert_eq!(
            AppError::from(StoreError::NotFound(Uuid::new_v4())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(StoreError::InvalidRange {
                start: 10,
                end: 10,
                length: 5
            })
            .status,
            StatusCode::BAD_REQUEST
        );
        let internal = AppError::from(StoreError::CorruptManifest {
            id: Uuid::new_v4(),
            reason: "missing chunk".into(),
        });
        assert_eq!(internal.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!internal.error.contains("missing chunk"));
    }

    #[test]
    fn catalog_errors_map_to_statuses() {
        assert_eq!(
            AppError::from(CatalogError::NotFound("v".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(CatalogError::StorageUnavailable(sqlx::Error::PoolTimedOut)).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
