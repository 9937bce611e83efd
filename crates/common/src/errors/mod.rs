//! Error types for SecDigest stages
//!
//! Provides a single error enum shared by every stage with:
//! - Distinct variants for each failure mode
//! - Machine-readable error codes
//! - A severity classification that tells a stage whether to skip the
//!   current item or abort the whole run

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    MissingField,
    InvalidFormat,
    InvalidTimestamp,

    // Resource errors (4xxx)
    DocumentMissing,
    DocumentUnreadable,

    // Conflict errors (5xxx)
    DuplicatePaper,

    // Storage errors (7xxx)
    StoreError,

    // External service errors (8xxx)
    UpstreamError,
    FeedDecodeError,
    DownloadError,
    ModelError,
    ModelResponseError,

    // Internal errors (9xxx)
    ConfigurationError,
    IoError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,
            ErrorCode::InvalidTimestamp => 1004,

            ErrorCode::DocumentMissing => 4010,
            ErrorCode::DocumentUnreadable => 4011,

            ErrorCode::DuplicatePaper => 5002,

            ErrorCode::StoreError => 7001,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::FeedDecodeError => 8002,
            ErrorCode::DownloadError => 8003,
            ErrorCode::ModelError => 8004,
            ErrorCode::ModelResponseError => 8005,

            ErrorCode::ConfigurationError => 9002,
            ErrorCode::IoError => 9004,
        }
    }
}

/// How far an error is allowed to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Log it, leave the record as it was and move on to the next item.
    /// The item is picked up again on the next run.
    Item,
    /// Abort the run. Work already persisted stays persisted.
    Run,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Invalid timestamp: {value}")]
    InvalidTimestamp { value: String },

    // Resource errors
    #[error("Document missing: {path}")]
    DocumentMissing { path: String },

    #[error("Document unreadable {path}: {message}")]
    DocumentUnreadable { path: String, message: String },

    // Conflict errors
    #[error("Duplicate paper: {message}")]
    Duplicate { message: String },

    // Storage errors
    #[error("Store error at {path}: {message}")]
    Store { path: String, message: String },

    // External service errors
    #[error("Upstream error from {service}: {message}")]
    Upstream { service: String, message: String },

    #[error("Feed decode error: {message}")]
    FeedDecode { message: String },

    #[error("Download failed for {url}: {message}")]
    Download { url: String, message: String },

    #[error("Model call failed: {message}")]
    Model { message: String },

    #[error("Malformed model response: {message}")]
    ModelResponse { message: String },

    // Internal errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::InvalidTimestamp { .. } => ErrorCode::InvalidTimestamp,
            AppError::DocumentMissing { .. } => ErrorCode::DocumentMissing,
            AppError::DocumentUnreadable { .. } => ErrorCode::DocumentUnreadable,
            AppError::Duplicate { .. } => ErrorCode::DuplicatePaper,
            AppError::Store { .. } => ErrorCode::StoreError,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::FeedDecode { .. } => ErrorCode::FeedDecodeError,
            AppError::Download { .. } => ErrorCode::DownloadError,
            AppError::Model { .. } => ErrorCode::ModelError,
            AppError::ModelResponse { .. } => ErrorCode::ModelResponseError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Io(_) => ErrorCode::IoError,
        }
    }

    /// Get the severity of this error
    pub fn severity(&self) -> Severity {
        match self {
            // Single item: logged, skipped, retried next run
            AppError::MissingField { .. } |
            AppError::InvalidFormat { .. } |
            AppError::InvalidTimestamp { .. } |
            AppError::DocumentMissing { .. } |
            AppError::DocumentUnreadable { .. } |
            AppError::Duplicate { .. } |
            AppError::Download { .. } |
            AppError::Model { .. } |
            AppError::ModelResponse { .. } => Severity::Item,

            // Whole run
            AppError::Store { .. } |
            AppError::Upstream { .. } |
            AppError::FeedDecode { .. } |
            AppError::Configuration { .. } |
            AppError::Io(_) => Severity::Run,
        }
    }

    /// Check if this error must abort the run
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Run
    }
}
