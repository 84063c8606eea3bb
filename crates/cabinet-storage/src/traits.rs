//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement,
//! together with the error taxonomy shared by every backend.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cabinet_core::{AppError, Retryable, TenantId};
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;

use crate::StorageBackend;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Transport failure or timeout; worth retrying
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected the request (credentials, permissions); not retried
    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Size mismatch: expected {expected} bytes, wrote {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Lazy, finite, single-pass byte sequence produced by [`Storage::get`].
pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;

fn is_transient_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

impl Retryable for StorageError {
    fn is_transient(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            StorageError::IoError(err) => is_transient_io(err),
            _ => false,
        }
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        StorageError::Unavailable(format!(
            "{} timed out after {}ms",
            operation,
            after.as_millis()
        ))
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            // Keys are never echoed back to callers
            StorageError::NotFound(_) => AppError::NotFound("File not found".to_string()),
            StorageError::QuotaExceeded(msg) => AppError::QuotaExceeded(msg),
            StorageError::SizeMismatch { expected, actual } => {
                AppError::SizeMismatch { expected, actual }
            }
            StorageError::IoError(err) if err.kind() == io::ErrorKind::StorageFull => {
                AppError::QuotaExceeded(err.to_string())
            }
            StorageError::InvalidKey(msg) | StorageError::ConfigError(msg) => {
                AppError::Internal(msg)
            }
            other => AppError::StorageUnavailable(other.to_string()),
        }
    }
}

/// An in-progress write. Bytes become visible only after [`PutSession::commit`].
///
/// A session dropped without `commit` or `abort` removes its partial data on a
/// best-effort basis.
#[async_trait]
pub trait PutSession: Send {
    /// Key the object will be visible under once committed
    fn storage_key(&self) -> &str;

    /// Bytes acknowledged so far
    fn bytes_written(&self) -> u64;

    /// Append a chunk. A chunk that failed with a transient error may be written again.
    ///
    /// Object store sessions never report a transient failure here: their client
    /// retries each part itself, and a part that still fails ends the session with
    /// `UploadFailed`.
    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()>;

    /// Make the object visible. Fails with `SizeMismatch` if the session was opened
    /// with an expected size that differs from the bytes written.
    async fn commit(self: Box<Self>) -> StorageResult<String>;

    /// Discard everything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Storage abstraction trait
///
/// All storage backends (local filesystem, AWS, Azure, GCP) implement this trait with
/// the same error taxonomy and the same atomicity guarantee, so callers never branch
/// on the backend type.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;

    /// Open a write session for `name` inside the tenant's key space.
    async fn begin_put(
        &self,
        tenant_id: &TenantId,
        name: &str,
        content_type: &str,
        expected_size: Option<u64>,
    ) -> StorageResult<Box<dyn PutSession>>;

    /// Write a whole stream and return the storage key.
    ///
    /// On any failure the partial object is discarded before the error is returned.
    async fn put(
        &self,
        tenant_id: &TenantId,
        name: &str,
        content_type: &str,
        mut data: ByteStream,
        expected_size: Option<u64>,
    ) -> StorageResult<String> {
        let mut session = self
            .begin_put(tenant_id, name, content_type, expected_size)
            .await?;

        while let Some(chunk) = data.next().await {
            let written = match chunk {
                Ok(chunk) => session.write_chunk(chunk).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                let storage_key = session.storage_key().to_string();
                if let Err(abort_err) = session.abort().await {
                    tracing::warn!(
                        storage_key = %storage_key,
                        error = %abort_err,
                        "Failed to abort partial upload"
                    );
                }
                return Err(e);
            }
        }

        session.commit().await
    }

    /// Stream an object. Fails with `NotFound` if the key is absent.
    async fn get(&self, storage_key: &str) -> StorageResult<ByteStream>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Check if an object exists
    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;
}
