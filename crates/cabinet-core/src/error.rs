//! Error types module
//!
//! All caller-facing failures are unified under [`AppError`]. Backend crates keep their
//! own error enums (storage, metadata store) and convert into `AppError` at the crate
//! boundary, so callers never match on a backend-specific type.
//!
//! There is deliberately no `Forbidden` variant: an ownership mismatch is reported as
//! [`AppError::NotFound`] so a caller cannot learn that another tenant's file exists.

use std::io;

/// Severity an error should be logged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Caller mistakes and expected outcomes
    Debug,
    Warn,
    /// Backend outages and bugs
    Error,
}

/// Presentation of an error to a transport layer, which can map errors through
/// this trait without matching on variants.
pub trait ErrorMetadata {
    fn http_status_code(&self) -> u16;

    /// Stable machine-readable code, e.g. `STORAGE_UNAVAILABLE`
    fn error_code(&self) -> &'static str;

    /// Whether the same request may succeed if sent again later
    fn is_recoverable(&self) -> bool;

    /// Message safe to show the caller. Backend details are withheld.
    fn client_message(&self) -> String;

    fn is_sensitive(&self) -> bool;

    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Metadata store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Size mismatch: expected {expected} bytes, received {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("File exceeds the maximum allowed size of {limit} bytes")]
    SizeLimitExceeded { limit: u64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{message}")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    /// Whether the error came from a backend that may recover on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::StorageUnavailable(_) | AppError::StoreUnavailable(_)
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(source: anyhow::Error) -> Self {
        let message = format!("{:#}", source);
        AppError::InternalWithSource { message, source }
    }
}

impl From<io::Error> for AppError {
    fn from(e: io::Error) -> Self {
        AppError::Internal(format!("I/O failure: {}", e))
    }
}

impl From<uuid::Error> for AppError {
    fn from(e: uuid::Error) -> Self {
        AppError::Validation(format!("Malformed id: {}", e))
    }
}

struct ErrorClass {
    status: u16,
    code: &'static str,
    recoverable: bool,
    sensitive: bool,
    level: LogLevel,
}

const fn class(
    status: u16,
    code: &'static str,
    recoverable: bool,
    sensitive: bool,
    level: LogLevel,
) -> ErrorClass {
    ErrorClass {
        status,
        code,
        recoverable,
        sensitive,
        level,
    }
}

impl AppError {
    fn class(&self) -> ErrorClass {
        use LogLevel::*;
        match self {
            AppError::Validation(_) => class(400, "VALIDATION_ERROR", false, false, Debug),
            AppError::NotFound(_) => class(404, "NOT_FOUND", false, false, Debug),
            AppError::StorageUnavailable(_) => class(503, "STORAGE_UNAVAILABLE", true, true, Error),
            AppError::StoreUnavailable(_) => class(503, "STORE_UNAVAILABLE", true, true, Error),
            AppError::QuotaExceeded(_) => class(507, "QUOTA_EXCEEDED", false, true, Warn),
            AppError::SizeMismatch { .. } => class(400, "SIZE_MISMATCH", false, false, Warn),
            AppError::SizeLimitExceeded { .. } => {
                class(413, "SIZE_LIMIT_EXCEEDED", false, false, Debug)
            }
            AppError::Conflict(_) => class(409, "CONFLICT", true, false, Warn),
            AppError::Cancelled(_) => class(499, "CANCELLED", true, false, Debug),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                class(500, "INTERNAL_ERROR", true, true, Error)
            }
        }
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        self.class().status
    }

    fn error_code(&self) -> &'static str {
        self.class().code
    }

    fn is_recoverable(&self) -> bool {
        self.class().recoverable
    }

    fn client_message(&self) -> String {
        match self {
            AppError::StorageUnavailable(_) => "File storage is temporarily unavailable".into(),
            AppError::StoreUnavailable(_) => "Metadata store is temporarily unavailable".into(),
            AppError::QuotaExceeded(_) => "Storage capacity exceeded".into(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Something went wrong on our side".into()
            }
            other => other.to_string(),
        }
    }

    fn is_sensitive(&self) -> bool {
        self.class().sensitive
    }

    fn log_level(&self) -> LogLevel {
        self.class().level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_faults_are_not_recoverable() {
        let err = AppError::Validation("bad extension".to_string());
        assert_eq!(err.http_status_code(), 400);
        assert!(!err.is_recoverable());
        assert_eq!(LogLevel::Debug, err.log_level());

        let err = AppError::SizeLimitExceeded { limit: 10 };
        assert_eq!(err.http_status_code(), 413);
        assert_eq!(err.error_code(), "SIZE_LIMIT_EXCEEDED");
    }

    #[test]
    fn test_backend_errors_hide_details() {
        let err = AppError::StorageUnavailable("s3 at 10.0.0.4 refused connection".to_string());
        assert!(err.is_transient() && err.is_sensitive());
        assert!(!err.client_message().contains("10.0.0.4"));
    }

    #[test]
    fn test_not_found_message_is_passed_through() {
        let err = AppError::NotFound("file".to_string());
        assert_eq!(err.client_message(), "Not found: file");
        assert!(!err.is_transient());
    }
}
