//! Error types for dlhub
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (database, download task state)
//! - A coarse [`ErrorKind`] classification shared by every transport
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for dlhub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for dlhub
///
/// Data-access failures are translated into these variants at the manager
/// boundary; transports only ever see an [`Error`] and its [`ErrorKind`].
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "auth.token.expires_in")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Download task state error
    #[error("download task error: {0}")]
    DownloadTask(#[from] DownloadTaskError),

    /// Account, task or object not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists (e.g. account name taken)
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Bad credentials or an invalid, expired or malformed token
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Caller supplied an invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Object storage failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Cache failure (never fatal, callers fall back to the database)
    #[error("cache error: {0}")]
    Cache(String),

    /// Signing or hashing failure
    #[error("crypto error: {0}")]
    Crypto(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Operation not supported (e.g. unknown download type)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Operation was cancelled before it completed
    #[error("operation cancelled")]
    Cancelled,

    /// The instance is shutting down and takes no new work
    #[error("shutdown in progress")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Lock contention or pool exhaustion; the operation may succeed if retried
    #[error("database busy: {0}")]
    Busy(String),
}

/// Download task errors
#[derive(Debug, Error)]
pub enum DownloadTaskError {
    /// Task not found, or not owned by the caller
    #[error("download task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: i64,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} download task {id} in state {current_state}")]
    InvalidState {
        /// The task ID that is in an invalid state for the operation
        id: i64,
        /// The operation that was attempted (e.g., "update", "delete")
        operation: String,
        /// The current state that prevents the operation (e.g., "downloading")
        current_state: String,
    },
}

/// Coarse error classification shared by all transports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Account or task absent
    NotFound,
    /// Name collision
    AlreadyExists,
    /// Bad credentials or token
    Unauthenticated,
    /// Malformed caller input
    InvalidArgument,
    /// Operation not allowed in the current state
    FailedPrecondition,
    /// Instance shutting down; retry against another one
    Unavailable,
    /// Storage, database, broker or other server-side failure
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) | Error::DownloadTask(DownloadTaskError::NotFound { .. }) => {
                ErrorKind::NotFound
            }
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::DownloadTask(DownloadTaskError::InvalidState { .. }) => {
                ErrorKind::FailedPrecondition
            }
            Error::ShuttingDown => ErrorKind::Unavailable,
            Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Storage(_)
            | Error::Cache(_)
            | Error::Crypto(_)
            | Error::Io(_)
            | Error::Network(_)
            | Error::Serialization(_)
            | Error::ApiServerError(_)
            | Error::NotSupported(_)
            | Error::Cancelled
            | Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a configuration error tied to a key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// API error response format
///
/// This structure is returned by API endpoints when an error occurs.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "download_task_not_found",
///     "message": "download task error: download task 7 not found",
///     "details": {
///       "task_id": 7
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "unauthenticated")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an "unauthenticated" error
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new("unauthenticated", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidArgument => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists | ErrorKind::FailedPrecondition => 409,
            ErrorKind::Unavailable => 503,
            ErrorKind::Internal => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::DownloadTask(e) => match e {
                DownloadTaskError::NotFound { .. } => "download_task_not_found",
                DownloadTaskError::InvalidState { .. } => "invalid_state",
            },
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::Unauthenticated(_) => "unauthenticated",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Storage(_) => "storage_error",
            Error::Cache(_) => "cache_error",
            Error::Crypto(_) => "crypto_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::NotSupported(_) => "not_supported",
            Error::Cancelled => "cancelled",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();

        // Internal failures keep their detail in the logs, not in the response
        let message = match error.kind() {
            ErrorKind::Internal => "internal server error".to_string(),
            _ => error.to_string(),
        };

        let details = match &error {
            Error::DownloadTask(DownloadTaskError::NotFound { id }) => Some(serde_json::json!({
                "task_id": id,
            })),
            Error::DownloadTask(DownloadTaskError::InvalidState {
                id,
                operation,
                current_state,
            }) => Some(serde_json::json!({
                "task_id": id,
                "operation": operation,
                "current_state": current_state,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
