//! Object store backends (AWS S3, Azure Blob Storage, Google Cloud Storage).
//!
//! All three share one implementation over [`object_store::ObjectStore`]. Uploads use
//! multipart sessions, which stay invisible until completed.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use cabinet_core::{RetryPolicy, TenantId};
use futures::StreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{MultipartUpload, ObjectStore, ObjectStoreExt, PutPayload};

use crate::keys::{generate_storage_key, validate_key};
use crate::traits::{ByteStream, PutSession, Storage, StorageError, StorageResult};
use crate::StorageBackend;

/// S3 rejects non-final parts smaller than 5 MiB.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

fn map_store_error(err: ObjectStoreError, storage_key: &str) -> StorageError {
    match err {
        ObjectStoreError::NotFound { .. } => StorageError::NotFound(storage_key.to_string()),
        ObjectStoreError::InvalidPath { source } => StorageError::InvalidKey(source.to_string()),
        e @ ObjectStoreError::Unauthenticated { .. } => StorageError::BackendError(e.to_string()),
        e @ ObjectStoreError::PermissionDenied { .. } => StorageError::BackendError(e.to_string()),
        e @ ObjectStoreError::NotSupported { .. } => StorageError::BackendError(e.to_string()),
        other => StorageError::Unavailable(other.to_string()),
    }
}

fn object_path(storage_key: &str) -> StorageResult<Path> {
    validate_key(storage_key)?;
    Path::parse(storage_key).map_err(|e| StorageError::InvalidKey(e.to_string()))
}

#[cfg(any(
    feature = "storage-aws",
    feature = "storage-azure",
    feature = "storage-gcp"
))]
fn client_settings(policy: &RetryPolicy) -> (object_store::RetryConfig, object_store::ClientOptions) {
    let mut retry = object_store::RetryConfig::default();
    // The transfer engine retries on top of this; keep the client's own budget small
    retry.max_retries = policy.attempts().saturating_sub(1) as usize;
    retry.retry_timeout = policy.attempt_timeout;
    let options = object_store::ClientOptions::new().with_timeout(policy.attempt_timeout);
    (retry, options)
}

/// Storage backed by any object store.
#[derive(Clone)]
pub struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
    backend: StorageBackend,
    part_size: usize,
}

impl ObjectStoreStorage {
    pub fn new(store: Arc<dyn ObjectStore>, backend: StorageBackend) -> Self {
        Self {
            store,
            backend,
            part_size: MIN_PART_SIZE,
        }
    }

    /// Process-local store tagged as `backend`, for tests and dry runs.
    pub fn in_memory(backend: StorageBackend) -> Self {
        Self::new(Arc::new(InMemory::new()), backend)
    }

    /// Override the multipart part size. Values below [`MIN_PART_SIZE`] only work
    /// against stores without that restriction, such as the in-memory store.
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Create an AWS S3 backed store.
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region
    /// * `endpoint` - Optional custom endpoint for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    #[cfg(feature = "storage-aws")]
    pub fn aws(
        bucket: &str,
        region: &str,
        endpoint: Option<&str>,
        credentials: Option<(&str, &str)>,
        policy: &RetryPolicy,
    ) -> StorageResult<Self> {
        use object_store::aws::AmazonS3Builder;

        let (retry, options) = client_settings(policy);
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket)
            .with_retry(retry)
            .with_client_options(options);

        if let Some(endpoint) = endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder.with_endpoint(endpoint).with_allow_http(allow_http);
        }
        if let Some((access_key_id, secret_access_key)) = credentials {
            builder = builder
                .with_access_key_id(access_key_id)
                .with_secret_access_key(secret_access_key);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(format!("Failed to build S3 client: {}", e)))?;

        tracing::info!(bucket = %bucket, region = %region, "AWS S3 storage initialized");
        Ok(Self::new(Arc::new(store), StorageBackend::Aws))
    }

    #[cfg(feature = "storage-azure")]
    pub fn azure(
        account: &str,
        access_key: Option<&str>,
        container: &str,
        policy: &RetryPolicy,
    ) -> StorageResult<Self> {
        use object_store::azure::MicrosoftAzureBuilder;

        let (retry, options) = client_settings(policy);
        let mut builder = MicrosoftAzureBuilder::from_env()
            .with_account(account)
            .with_container_name(container)
            .with_retry(retry)
            .with_client_options(options);
        if let Some(access_key) = access_key {
            builder = builder.with_access_key(access_key);
        }

        let store = builder.build().map_err(|e| {
            StorageError::ConfigError(format!("Failed to build Azure client: {}", e))
        })?;

        tracing::info!(account = %account, container = %container, "Azure Blob storage initialized");
        Ok(Self::new(Arc::new(store), StorageBackend::Azure))
    }

    #[cfg(feature = "storage-gcp")]
    pub fn gcp(
        bucket: &str,
        service_account_path: Option<&str>,
        policy: &RetryPolicy,
    ) -> StorageResult<Self> {
        use object_store::gcp::GoogleCloudStorageBuilder;

        let (retry, options) = client_settings(policy);
        let mut builder = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .with_retry(retry)
            .with_client_options(options);
        if let Some(path) = service_account_path {
            builder = builder.with_service_account_path(path);
        }

        let store = builder.build().map_err(|e| {
            StorageError::ConfigError(format!("Failed to build GCS client: {}", e))
        })?;

        tracing::info!(bucket = %bucket, "Google Cloud Storage initialized");
        Ok(Self::new(Arc::new(store), StorageBackend::Gcp))
    }
}

#[async_trait]
impl Storage for ObjectStoreStorage {
    fn backend_type(&self) -> StorageBackend {
        self.backend
    }

    async fn begin_put(
        &self,
        tenant_id: &TenantId,
        name: &str,
        _content_type: &str,
        expected_size: Option<u64>,
    ) -> StorageResult<Box<dyn PutSession>> {
        let storage_key = generate_storage_key(tenant_id, name)?;
        let location = object_path(&storage_key)?;

        let upload = self
            .store
            .put_multipart(&location)
            .await
            .map_err(|e| map_store_error(e, &storage_key))?;

        Ok(Box::new(MultipartPutSession {
            storage_key,
            upload: Some(upload),
            buffer: BytesMut::with_capacity(self.part_size),
            part_size: self.part_size,
            parts: 0,
            bytes_written: 0,
            expected_size,
            poisoned: None,
        }))
    }

    async fn get(&self, storage_key: &str) -> StorageResult<ByteStream> {
        let location = object_path(storage_key)?;

        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_store_error(e, storage_key))?;

        let key = storage_key.to_string();
        let stream = result
            .into_stream()
            .map(move |chunk| chunk.map_err(|e| map_store_error(e, &key)));
        Ok(stream.boxed())
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let location = object_path(storage_key)?;

        match self.store.delete(&location).await {
            Ok(()) => {
                tracing::debug!(storage_key = %storage_key, backend = %self.backend, "Object deleted");
                Ok(())
            }
            Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_store_error(e, storage_key)),
        }
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let location = object_path(storage_key)?;

        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_store_error(e, storage_key)),
        }
    }
}

/// Multipart write session. Chunks are buffered up to one part before upload.
///
/// A part upload that fails or is interrupted leaves the part sequence in an
/// unknown state, so the session refuses further writes and reports the original
/// cause as a non-transient `UploadFailed`. Transient part failures are retried
/// inside the object_store client (see `client_settings`), not by the caller.
struct MultipartPutSession {
    storage_key: String,
    upload: Option<Box<dyn MultipartUpload>>,
    buffer: BytesMut,
    part_size: usize,
    parts: usize,
    bytes_written: u64,
    expected_size: Option<u64>,
    /// Cause of the part upload that did not complete
    poisoned: Option<String>,
}

impl MultipartPutSession {
    async fn flush_part(&mut self) -> StorageResult<()> {
        let upload = self
            .upload
            .as_mut()
            .ok_or_else(|| StorageError::UploadFailed("session already closed".to_string()))?;
        let part: Bytes = self.buffer.split().freeze();

        self.poisoned = Some("part upload interrupted".to_string());
        if let Err(e) = upload.put_part(PutPayload::from(part)).await {
            let cause = format!("part upload failed: {}", e);
            self.poisoned = Some(cause.clone());
            return Err(StorageError::UploadFailed(cause));
        }
        self.poisoned = None;
        self.parts += 1;
        Ok(())
    }

    fn poisoned_error(&self) -> Option<StorageError> {
        self.poisoned.as_ref().map(|cause| {
            StorageError::UploadFailed(format!("multipart session unusable, {}", cause))
        })
    }

    async fn abort_upload(&mut self) {
        if let Some(mut upload) = self.upload.take() {
            if let Err(e) = upload.abort().await {
                tracing::warn!(
                    storage_key = %self.storage_key,
                    error = %e,
                    "Failed to abort multipart upload"
                );
            }
        }
    }
}

#[async_trait]
impl PutSession for MultipartPutSession {
    fn storage_key(&self) -> &str {
        &self.storage_key
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()> {
        if let Some(err) = self.poisoned_error() {
            return Err(err);
        }

        self.buffer.extend_from_slice(&chunk);
        self.bytes_written += chunk.len() as u64;

        if self.buffer.len() >= self.part_size {
            self.flush_part().await?;
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StorageResult<String> {
        if let Some(err) = self.poisoned_error() {
            self.abort_upload().await;
            return Err(err);
        }

        if let Some(expected) = self.expected_size {
            if expected != self.bytes_written {
                let actual = self.bytes_written;
                self.abort_upload().await;
                return Err(StorageError::SizeMismatch { expected, actual });
            }
        }

        if !self.buffer.is_empty() || self.parts == 0 {
            if let Err(e) = self.flush_part().await {
                self.abort_upload().await;
                return Err(e);
            }
        }

        let mut upload = self
            .upload
            .take()
            .ok_or_else(|| StorageError::UploadFailed("session already closed".to_string()))?;
        if let Err(e) = upload.complete().await {
            let err = map_store_error(e, &self.storage_key);
            if let Err(abort_err) = upload.abort().await {
                tracing::warn!(
                    storage_key = %self.storage_key,
                    error = %abort_err,
                    "Failed to abort multipart upload"
                );
            }
            return Err(err);
        }

        tracing::debug!(
            storage_key = %self.storage_key,
            size_bytes = self.bytes_written,
            parts = self.parts,
            "Multipart upload completed"
        );
        Ok(self.storage_key.clone())
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        self.abort_upload().await;
        Ok(())
    }
}

impl Drop for MultipartPutSession {
    fn drop(&mut self) {
        if let Some(mut upload) = self.upload.take() {
            let storage_key = std::mem::take(&mut self.storage_key);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = upload.abort().await {
                        tracing::warn!(
                            storage_key = %storage_key,
                            error = %e,
                            "Failed to abort dropped multipart upload"
                        );
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabinet_core::Retryable;
    use futures::stream;

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    async fn read_all(storage: &ObjectStoreStorage, key: &str) -> Vec<u8> {
        let mut stream = storage.get(key).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_multipart_upload_spans_parts() {
        let storage = ObjectStoreStorage::in_memory(StorageBackend::Aws).with_part_size(4);
        let data = stream::iter(
            [b"abc".as_slice(), b"defgh", b"ij"]
                .into_iter()
                .map(|c| Ok(Bytes::copy_from_slice(c))),
        )
        .boxed();
        let key = storage
            .put(&tenant("t1"), "x.bin", "application/octet-stream", data, Some(10))
            .await
            .unwrap();
        assert_eq!(read_all(&storage, &key).await, b"abcdefghij");
        assert_eq!(storage.backend_type(), StorageBackend::Aws);
    }

    #[tokio::test]
    async fn test_uncommitted_upload_is_invisible() {
        let storage = ObjectStoreStorage::in_memory(StorageBackend::Gcp).with_part_size(2);
        let mut session = storage
            .begin_put(&tenant("t1"), "y.bin", "application/octet-stream", None)
            .await
            .unwrap();
        session.write_chunk(Bytes::from_static(b"abcdef")).await.unwrap();
        let key = session.storage_key().to_string();
        assert!(!storage.exists(&key).await.unwrap());
        session.abort().await.unwrap();
        assert!(!storage.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_size_mismatch_is_not_committed() {
        let storage = ObjectStoreStorage::in_memory(StorageBackend::Azure);
        let data = stream::iter(vec![Ok(Bytes::from_static(b"abc"))]).boxed();
        let err = storage
            .put(&tenant("t1"), "z.bin", "application/octet-stream", data, Some(4))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SizeMismatch { expected: 4, actual: 3 }));
        assert!(!storage.exists("tenants/t1/files/z.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_interrupted_part_fails_session_permanently() {
        let store = InMemory::new();
        let key = "tenants/t1/files/p.bin".to_string();
        let upload = store.put_multipart(&object_path(&key).unwrap()).await.unwrap();
        let mut session = Box::new(MultipartPutSession {
            storage_key: key.clone(),
            upload: Some(upload),
            buffer: BytesMut::new(),
            part_size: 4,
            parts: 0,
            bytes_written: 0,
            expected_size: None,
            poisoned: Some("part upload failed: connection reset".to_string()),
        });

        let err = session.write_chunk(Bytes::from_static(b"abcd")).await.unwrap_err();
        assert!(matches!(&err, StorageError::UploadFailed(msg) if msg.contains("connection reset")));
        assert!(!err.is_transient());

        let err = session.commit().await.unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed(_)));
        assert!(store.head(&object_path(&key).unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_object() {
        let storage = ObjectStoreStorage::in_memory(StorageBackend::Aws);
        assert!(matches!(
            storage.get("tenants/t1/files/none.bin").await,
            Err(StorageError::NotFound(_))
        ));
        storage.delete("tenants/t1/files/none.bin").await.unwrap();
        assert!(!storage.exists("tenants/t1/files/none.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_object() {
        let storage = ObjectStoreStorage::in_memory(StorageBackend::Aws);
        let key = storage
            .put(
                &tenant("t1"),
                "empty.bin",
                "application/octet-stream",
                stream::empty().boxed(),
                Some(0),
            )
            .await
            .unwrap();
        assert!(storage.exists(&key).await.unwrap());
        assert!(read_all(&storage, &key).await.is_empty());
    }
}
