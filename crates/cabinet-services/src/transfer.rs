//! Chunked Transfer Engine
//!
//! Moves bytes between a caller's stream and a [`Storage`] backend in bounded
//! chunks. Uploads are hashed and size-checked as they arrive; nothing becomes
//! visible in storage unless the whole stream was accepted. Downloads are lazy
//! and verify the stored length against the recorded size.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use cabinet_core::{AppError, RetryPolicy, Retryable, TenantId};
use cabinet_storage::{ByteStream, PutSession, Storage, StorageError};
use futures::stream::{self, BoxStream, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Bytes supplied by the caller. An `Err` item means the producer went away.
pub type InboundStream = BoxStream<'static, io::Result<Bytes>>;

/// Bytes handed back to the caller on fetch.
pub type FileStream = BoxStream<'static, Result<Bytes, AppError>>;

/// Result of a committed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub storage_key: String,
    pub size_bytes: u64,
    pub checksum_sha256: String,
}

pub struct ChunkedTransferEngine {
    storage: Arc<dyn Storage>,
    chunk_size: usize,
    max_file_size: u64,
    retry: RetryPolicy,
}

impl ChunkedTransferEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        chunk_size: usize,
        max_file_size: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            chunk_size: chunk_size.max(1),
            max_file_size,
            retry,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Stream `body` into storage under `name` and commit it.
    ///
    /// Reading stops as soon as the running total passes the size limit, so an
    /// oversize stream is never consumed in full. Every failure path aborts the
    /// session before returning; dropping the returned future leaves cleanup to
    /// the session's own drop.
    pub async fn upload(
        &self,
        tenant_id: &TenantId,
        name: &str,
        content_type: &str,
        body: InboundStream,
        expected_size: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, AppError> {
        if let Some(expected) = expected_size {
            if expected > self.max_file_size {
                return Err(AppError::SizeLimitExceeded {
                    limit: self.max_file_size,
                });
            }
        }

        let mut session = cabinet_core::retry(&self.retry, "storage.begin_put", || {
            self.storage
                .begin_put(tenant_id, name, content_type, expected_size)
        })
        .await?;

        let (size_bytes, checksum_sha256) = match self
            .pump(&mut *session, body, expected_size, cancel)
            .await
        {
            Ok(totals) => totals,
            Err(err) => {
                let storage_key = session.storage_key().to_string();
                if let Err(abort_err) = session.abort().await {
                    tracing::warn!(
                        storage_key = %storage_key,
                        error = %abort_err,
                        "Failed to abort partial upload"
                    );
                }
                tracing::info!(
                    tenant_id = %tenant_id,
                    error = %err,
                    "Upload aborted"
                );
                return Err(err);
            }
        };

        // A commit that times out is dropped, which discards the session
        let storage_key = match timeout(self.retry.attempt_timeout, session.commit()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StorageError::timed_out(
                    "storage.commit",
                    self.retry.attempt_timeout,
                )
                .into())
            }
        };

        tracing::debug!(
            tenant_id = %tenant_id,
            size_bytes,
            "Upload committed to storage"
        );

        Ok(TransferOutcome {
            storage_key,
            size_bytes,
            checksum_sha256,
        })
    }

    async fn pump(
        &self,
        session: &mut dyn PutSession,
        mut body: InboundStream,
        expected_size: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<(u64, String), AppError> {
        let mut hasher = Sha256::new();
        let mut buffer = BytesMut::with_capacity(self.chunk_size);
        let mut received: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AppError::Cancelled("Upload cancelled".to_string()));
                }
                next = body.next() => next,
            };

            let bytes = match next {
                None => break,
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    return Err(AppError::Cancelled(format!("Upload stream closed: {}", e)));
                }
            };

            received += bytes.len() as u64;
            if received > self.max_file_size {
                return Err(AppError::SizeLimitExceeded {
                    limit: self.max_file_size,
                });
            }
            if let Some(expected) = expected_size {
                if received > expected {
                    return Err(AppError::SizeMismatch {
                        expected,
                        actual: received,
                    });
                }
            }

            hasher.update(&bytes);
            buffer.extend_from_slice(&bytes);
            while buffer.len() >= self.chunk_size {
                let chunk = buffer.split_to(self.chunk_size).freeze();
                self.write_chunk(session, chunk).await?;
            }
        }

        if !buffer.is_empty() {
            self.write_chunk(session, buffer.split().freeze()).await?;
        }

        if let Some(expected) = expected_size {
            if received != expected {
                return Err(AppError::SizeMismatch {
                    expected,
                    actual: received,
                });
            }
        }

        Ok((received, hex::encode(hasher.finalize())))
    }

    /// Write one chunk, retrying transient failures with backoff.
    async fn write_chunk(
        &self,
        session: &mut dyn PutSession,
        chunk: Bytes,
    ) -> Result<(), StorageError> {
        let attempts = self.retry.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match timeout(
                self.retry.attempt_timeout,
                session.write_chunk(chunk.clone()),
            )
            .await
            {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => err,
                Err(_) => StorageError::timed_out("storage.write_chunk", self.retry.attempt_timeout),
            };

            if !err.is_transient() || attempt >= attempts {
                return Err(err);
            }

            let delay = self.retry.backoff(attempt);
            tracing::debug!(
                storage_key = %session.storage_key(),
                bytes_written = session.bytes_written(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Chunk write failed, retrying"
            );
            sleep(delay).await;
        }
    }

    /// Open a lazy stream over a stored object.
    ///
    /// Chunks are re-split to at most `chunk_size` bytes. If the object's length
    /// differs from `expected_size` the stream ends with `SizeMismatch`. The
    /// optional permit is released when the stream is dropped.
    pub async fn download(
        &self,
        storage_key: &str,
        expected_size: u64,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<FileStream, AppError> {
        let inner = cabinet_core::retry(&self.retry, "storage.get", || {
            self.storage.get(storage_key)
        })
        .await?;

        let state = DownloadState {
            inner,
            pending: Bytes::new(),
            received: 0,
            expected: expected_size,
            chunk_size: self.chunk_size,
            finished: false,
            _permit: permit,
        };
        Ok(stream::unfold(state, next_download_chunk).boxed())
    }
}

struct DownloadState {
    inner: ByteStream,
    pending: Bytes,
    received: u64,
    expected: u64,
    chunk_size: usize,
    finished: bool,
    _permit: Option<OwnedSemaphorePermit>,
}

async fn next_download_chunk(
    mut state: DownloadState,
) -> Option<(Result<Bytes, AppError>, DownloadState)> {
    if state.finished {
        return None;
    }
    loop {
        if !state.pending.is_empty() {
            let n = state.pending.len().min(state.chunk_size);
            let chunk = state.pending.split_to(n);
            return Some((Ok(chunk), state));
        }

        match state.inner.next().await {
            Some(Ok(bytes)) => {
                state.received += bytes.len() as u64;
                if state.received > state.expected {
                    state.finished = true;
                    let err = AppError::SizeMismatch {
                        expected: state.expected,
                        actual: state.received,
                    };
                    return Some((Err(err), state));
                }
                state.pending = bytes;
            }
            Some(Err(err)) => {
                state.finished = true;
                return Some((Err(err.into()), state));
            }
            None => {
                state.finished = true;
                if state.received != state.expected {
                    let err = AppError::SizeMismatch {
                        expected: state.expected,
                        actual: state.received,
                    };
                    return Some((Err(err), state));
                }
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabinet_storage::ObjectStoreStorage;
    use cabinet_storage::StorageBackend;
    use std::time::Duration;

    fn engine(chunk_size: usize, max: u64) -> (Arc<dyn Storage>, ChunkedTransferEngine) {
        let storage: Arc<dyn Storage> = Arc::new(ObjectStoreStorage::in_memory(StorageBackend::Aws));
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempt_timeout: Duration::from_secs(5),
        };
        let engine = ChunkedTransferEngine::new(storage.clone(), chunk_size, max, policy);
        (storage, engine)
    }

    fn body(parts: Vec<&'static [u8]>) -> InboundStream {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p)))).boxed()
    }

    async fn collect(mut stream: FileStream) -> (Vec<Bytes>, Option<AppError>) {
        let mut chunks = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => chunks.push(chunk),
                Err(err) => return (chunks, Some(err)),
            }
        }
        (chunks, None)
    }

    #[tokio::test]
    async fn test_upload_hashes_and_counts_bytes() {
        let (_, engine) = engine(4, 1024);
        let tenant = TenantId::parse("t1").unwrap();
        let outcome = engine
            .upload(
                &tenant,
                "a.txt",
                "text/plain",
                body(vec![b"hello ", b"world"]),
                Some(11),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.size_bytes, 11);
        assert_eq!(
            outcome.checksum_sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert!(outcome.storage_key.starts_with("tenants/t1/files/"));
    }

    #[tokio::test]
    async fn test_download_splits_to_chunk_size() {
        let (_, engine) = engine(4, 1024);
        let tenant = TenantId::parse("t1").unwrap();
        let outcome = engine
            .upload(
                &tenant,
                "b.txt",
                "text/plain",
                body(vec![b"0123456789"]),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let stream = engine.download(&outcome.storage_key, 10, None).await.unwrap();
        let (chunks, err) = collect(stream).await;
        assert!(err.is_none());
        assert!(chunks.iter().all(|c| c.len() <= 4));
        assert_eq!(chunks.concat(), b"0123456789");
    }

    #[tokio::test]
    async fn test_download_reports_length_mismatch() {
        let (_, engine) = engine(4, 1024);
        let tenant = TenantId::parse("t1").unwrap();
        let outcome = engine
            .upload(
                &tenant,
                "c.txt",
                "text/plain",
                body(vec![b"abc"]),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let stream = engine.download(&outcome.storage_key, 5, None).await.unwrap();
        let (_, err) = collect(stream).await;
        assert!(matches!(
            err,
            Some(AppError::SizeMismatch {
                expected: 5,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_short_stream_is_size_mismatch_and_leaves_nothing() {
        let (storage, engine) = engine(4, 1024);
        let tenant = TenantId::parse("t1").unwrap();
        let err = engine
            .upload(
                &tenant,
                "d.txt",
                "text/plain",
                body(vec![b"abc"]),
                Some(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::SizeMismatch {
                expected: 10,
                actual: 3
            }
        ));
        assert!(!storage.exists("tenants/t1/files/d.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_upload_is_aborted() {
        let (storage, engine) = engine(4, 1024);
        let tenant = TenantId::parse("t1").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .upload(
                &tenant,
                "e.txt",
                "text/plain",
                body(vec![b"abcdef"]),
                None,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled(_)));
        assert!(!storage.exists("tenants/t1/files/e.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_producer_failure_aborts_upload() {
        let (storage, engine) = engine(4, 1024);
        let tenant = TenantId::parse("t1").unwrap();
        let parts: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abcdefgh")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ];

        let err = engine
            .upload(
                &tenant,
                "f.txt",
                "text/plain",
                stream::iter(parts).boxed(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled(_)));
        assert!(!storage.exists("tenants/t1/files/f.txt").await.unwrap());
    }
}
