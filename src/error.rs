//! Centralized error handling module.

use thiserror::Error;

/// Application-wide error type.
///
/// All errors in the application should be converted to this type
/// for consistent error handling and reporting.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A component was used before it was initialized
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem or stream error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Returns `true` for connection-class failures that are worth retrying.
    ///
    /// Query errors, decoding errors and every non-database variant are
    /// permanent: repeating the call would fail the same way.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type alias using `AppError`.
pub type AppResult<T> = Result<T, AppError>;

/// Helper trait for converting validation errors.
pub trait ValidationErrorExt {
    fn to_validation_error(&self) -> AppError;
}

impl ValidationErrorExt for validator::ValidationErrors {
    fn to_validation_error(&self) -> AppError {
        // Get the first field error for a clean message
        if let Some((field, errors)) = self.field_errors().iter().next() {
            if let Some(error) = errors.first() {
                let message = error.message.as_ref().map_or_else(
                    || {
                        format!(
                            "Validation failed on field '{field}' with tag '{}'",
                            error.code
                        )
                    },
                    std::string::ToString::to_string,
                );
                return AppError::Validation(message);
            }
        }
        AppError::Validation(self.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        errors.to_validation_error()
    }
}
