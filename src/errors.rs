use crate::services::storage_service::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
///
/// Serialized as `{"error": ...}` with an optional `"details"` field on
/// internal failures, which is the shape the upload client expects.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<String>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            details: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error with a technical detail line.
    pub fn internal(msg: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
            details: Some(details.into()),
        }
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => Json(json!({
                "error": self.message,
                "details": details,
            })),
            None => Json(json!({
                "error": self.message,
            })),
        };

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal("internal error", err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::MissingFields
            | StorageError::InvalidObjectKey
            | StorageError::InvalidPartNumber(_)
            | StorageError::PartTooLarge { .. }
            | StorageError::InvalidPartList(_) => {
                AppError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            StorageError::SessionNotFound(_) | StorageError::ObjectNotFound(_) => {
                AppError::not_found(err.to_string())
            }
            StorageError::SessionCompleted(_) => {
                AppError::new(StatusCode::CONFLICT, err.to_string())
            }
            StorageError::Sqlx(inner) => AppError::internal("storage failure", inner.to_string()),
            StorageError::Io(inner) => AppError::internal("storage failure", inner.to_string()),
        }
    }
}
