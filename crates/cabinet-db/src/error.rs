use std::time::Duration;

use cabinet_core::{AppError, Retryable};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Record not found")]
    NotFound,

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    /// Connection, pool or timeout failure; worth retrying
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

pub type StoreResult<T> = Result<T, MetadataError>;

impl Retryable for MetadataError {
    fn is_transient(&self) -> bool {
        matches!(self, MetadataError::Unavailable(_))
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        MetadataError::Unavailable(format!(
            "{} timed out after {}ms",
            operation,
            after.as_millis()
        ))
    }
}

impl From<sqlx::Error> for MetadataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => MetadataError::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                MetadataError::DuplicateId(db.message().to_string())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => MetadataError::Unavailable(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                MetadataError::Corrupt(err.to_string())
            }
            other => MetadataError::Database(other.to_string()),
        }
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound => AppError::NotFound("File not found".to_string()),
            MetadataError::DuplicateId(msg) => AppError::Conflict(msg),
            MetadataError::Unavailable(msg) => AppError::StoreUnavailable(msg),
            MetadataError::Corrupt(msg) | MetadataError::Database(msg) => AppError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_transient() {
        let err = MetadataError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
        assert!(matches!(AppError::from(err), AppError::StoreUnavailable(_)));
    }

    #[test]
    fn test_not_found_maps_to_app_not_found() {
        let err = MetadataError::from(sqlx::Error::RowNotFound);
        assert!(!err.is_transient());
        assert!(matches!(AppError::from(err), AppError::NotFound(_)));
    }
}
