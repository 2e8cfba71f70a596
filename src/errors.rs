use crate::services::{
    conversion_service::ConvertError, lifecycle::LifecycleError, reassembler::ReassemblyError,
    storage_service::StorageError,
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
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
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), error = %self.message, "request failed");
        }
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound(_) => AppError::not_found(err.to_string()),
            StorageError::InvalidObjectKey(_) => AppError::bad_request(err.to_string()),
            StorageError::Sqlx(_) | StorageError::Io(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Expired { .. } => AppError::new(StatusCode::GONE, err.to_string()),
            LifecycleError::Storage(err) => err.into(),
        }
    }
}

impl From<ReassemblyError> for AppError {
    fn from(err: ReassemblyError) -> Self {
        match err {
            ReassemblyError::InvalidChunk { .. } | ReassemblyError::TotalMismatch { .. } => {
                AppError::bad_request(err.to_string())
            }
            ReassemblyError::ReassemblyIncomplete { .. } => {
                AppError::new(StatusCode::CONFLICT, err.to_string())
            }
            ReassemblyError::Storage(err) => err.into(),
        }
    }
}

impl From<ConvertError> for AppError {
    fn from(err: ConvertError) -> Self {
        let status = match &err {
            ConvertError::SourceNotFound(_) => StatusCode::NOT_FOUND,
            ConvertError::Expired { .. } => StatusCode::GONE,
            ConvertError::ArchiveMalformed(_) | ConvertError::Classify(_) => {
                StatusCode::BAD_REQUEST
            }
            ConvertError::NothingEmbedded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ConvertError::Storage(StorageError::InvalidObjectKey(_)) => StatusCode::BAD_REQUEST,
            ConvertError::Storage(_) | ConvertError::Assembly(_) | ConvertError::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}
