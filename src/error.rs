//! # Error Handling
//!
//! This module defines the service's error taxonomy and how each kind is converted
//! into an HTTP response.
//!
//! ## Error Classes:
//! - **Validation** (400): missing file, unsupported format, bad model size, malformed form
//! - **Path security** (400): a filename that tried to leave its storage root
//! - **Not found** (404): no record / no file / no transcript
//! - **Operational** (500): storage, transcription engine, metadata store, config
//!
//! Every handler returns `AppResult<T>`; actix calls [`ResponseError::error_response`]
//! at the request boundary, so no pipeline error can take the process down.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::UnsupportedFormat("pdf".to_string()));
/// ```
#[derive(Debug, Error)]
pub enum AppError {
    /// The multipart form had no `file` part, or the part was empty
    #[error("No file provided")]
    NoFileProvided,

    /// Extension outside the supported media set
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Any other user-correctable input problem
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rejected traversal attempt or a name that sanitizes to nothing
    #[error("Invalid file path: {0}")]
    InvalidPath(String),

    /// Requested record or file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Writing the upload, transcript or sidecar to disk failed
    #[error("Storage write failed: {0}")]
    StorageWriteFailed(String),

    /// Other filesystem failures (reads, directory setup)
    #[error("Storage error: {0}")]
    Storage(String),

    /// The speech-to-text engine failed or produced no output
    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    /// A metadata mutation could not be committed
    #[error("Metadata commit failed: {0}")]
    MetadataCommitFailed(String),

    /// Metadata reads or connection problems
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration file or environment variable problems
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else that is our fault
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine-readable error type for the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NoFileProvided => "no_file_provided",
            AppError::UnsupportedFormat(_) => "unsupported_format",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidPath(_) => "invalid_path",
            AppError::NotFound(_) => "not_found",
            AppError::StorageWriteFailed(_) => "storage_write_failed",
            AppError::Storage(_) => "storage_error",
            AppError::TranscriptionFailed(_) => "transcription_failed",
            AppError::MetadataCommitFailed(_) => "metadata_commit_failed",
            AppError::Persistence(_) => "persistence_error",
            AppError::Config(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// True for errors the client can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// HTTP status mapping and JSON body.
///
/// ```json
/// {
///   "message": "Unsupported file format: pdf",
///   "error": { "type": "unsupported_format", "timestamp": "2025-01-01T12:00:00Z" }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NoFileProvided
            | AppError::UnsupportedFormat(_)
            | AppError::Validation(_)
            | AppError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::StorageWriteFailed(_)
            | AppError::Storage(_)
            | AppError::TranscriptionFailed(_)
            | AppError::MetadataCommitFailed(_)
            | AppError::Persistence(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "message": self.to_string(),
            "error": {
                "type": self.kind(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Persistence(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Malformed multipart bodies are the client's problem, not ours.
impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::Validation(format!("Malformed multipart body: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
