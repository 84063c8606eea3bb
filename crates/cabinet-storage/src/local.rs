use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use cabinet_core::TenantId;
use futures::StreamExt;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::keys::{generate_storage_key, validate_key};
use crate::traits::{ByteStream, PutSession, Storage, StorageError, StorageResult};
use crate::StorageBackend;

const PARTIAL_DIR: &str = ".partial";
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Map filesystem errors onto the shared taxonomy.
fn map_io(context: &str, err: io::Error) -> StorageError {
    match err.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound(context.to_string()),
        io::ErrorKind::StorageFull => {
            StorageError::QuotaExceeded(format!("{}: {}", context, err))
        }
        _ => StorageError::IoError(err),
    }
}

/// Local filesystem storage implementation
///
/// Writes land in `{base}/.partial/` and are renamed into place on commit, so a
/// half-written file is never visible under its final key.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage instance rooted at `base_path`.
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(base_path.join(PARTIAL_DIR))
            .await
            .map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    base_path.display(),
                    e
                ))
            })?;

        Ok(LocalStorage { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert storage key to filesystem path with security validation
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        validate_key(storage_key)?;

        let relative = Path::new(storage_key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(
                "Storage key resolves outside storage directory".to_string(),
            ));
        }
        if relative.starts_with(PARTIAL_DIR) {
            return Err(StorageError::InvalidKey(
                "Storage key points into the staging area".to_string(),
            ));
        }

        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }

    async fn begin_put(
        &self,
        tenant_id: &TenantId,
        name: &str,
        _content_type: &str,
        expected_size: Option<u64>,
    ) -> StorageResult<Box<dyn PutSession>> {
        let storage_key = generate_storage_key(tenant_id, name)?;
        let final_path = self.key_to_path(&storage_key)?;
        let temp_path = self
            .base_path
            .join(PARTIAL_DIR)
            .join(format!("{}.part", Uuid::new_v4()));

        let file = fs::File::create(&temp_path)
            .await
            .map_err(|e| map_io("create staging file", e))?;

        tracing::debug!(
            storage_key = %storage_key,
            temp_path = %temp_path.display(),
            "Local upload session opened"
        );

        Ok(Box::new(LocalPutSession {
            storage_key,
            final_path,
            temp_path,
            file: Some(file),
            expected_size,
            acknowledged: 0,
            dirty: false,
            finished: false,
        }))
    }

    async fn get(&self, storage_key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(storage_key)?;

        let file = fs::File::open(&path)
            .await
            .map_err(|e| map_io(storage_key, e))?;

        let stream = ReaderStream::with_capacity(file, READ_BUFFER_SIZE)
            .map(|chunk| chunk.map_err(StorageError::from));
        Ok(stream.boxed())
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(storage_key = %storage_key, "Local file deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!("{}: {}", storage_key, e))),
        }
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(storage_key)?;
        Ok(fs::try_exists(&path).await?)
    }
}

/// Write session backed by a staging file.
struct LocalPutSession {
    storage_key: String,
    final_path: PathBuf,
    temp_path: PathBuf,
    file: Option<fs::File>,
    expected_size: Option<u64>,
    /// Bytes confirmed written; the staging file is truncated back to this on retry
    acknowledged: u64,
    /// A write started but did not complete
    dirty: bool,
    finished: bool,
}

impl LocalPutSession {
    async fn rewind(&mut self) -> StorageResult<()> {
        let acknowledged = self.acknowledged;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::UploadFailed("session already closed".to_string()))?;
        file.flush().await.ok();
        file.set_len(acknowledged).await?;
        file.seek(SeekFrom::Start(acknowledged)).await?;
        self.dirty = false;
        Ok(())
    }

    async fn discard(&mut self) {
        self.file.take();
        if let Err(e) = fs::remove_file(&self.temp_path).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    temp_path = %self.temp_path.display(),
                    error = %e,
                    "Failed to remove staging file"
                );
            }
        }
        self.finished = true;
    }
}

#[async_trait]
impl PutSession for LocalPutSession {
    fn storage_key(&self) -> &str {
        &self.storage_key
    }

    fn bytes_written(&self) -> u64 {
        self.acknowledged
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()> {
        if self.dirty {
            self.rewind().await?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::UploadFailed("session already closed".to_string()))?;

        self.dirty = true;
        file.write_all(&chunk)
            .await
            .map_err(|e| map_io("write staging file", e))?;
        self.acknowledged += chunk.len() as u64;
        self.dirty = false;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StorageResult<String> {
        if self.dirty {
            self.rewind().await?;
        }

        let mut file = self
            .file
            .take()
            .ok_or_else(|| StorageError::UploadFailed("session already closed".to_string()))?;
        let synced = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = synced {
            self.discard().await;
            return Err(map_io("flush staging file", e));
        }

        if let Some(expected) = self.expected_size {
            if expected != self.acknowledged {
                let actual = self.acknowledged;
                self.discard().await;
                return Err(StorageError::SizeMismatch { expected, actual });
            }
        }

        let placed = async {
            if let Some(parent) = self.final_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&self.temp_path, &self.final_path).await
        }
        .await;
        if let Err(e) = placed {
            self.discard().await;
            return Err(map_io("move file into place", e));
        }

        self.finished = true;
        tracing::debug!(
            storage_key = %self.storage_key,
            size_bytes = self.acknowledged,
            "Local upload committed"
        );
        Ok(self.storage_key.clone())
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        self.discard().await;
        Ok(())
    }
}

impl Drop for LocalPutSession {
    fn drop(&mut self) {
        if !self.finished {
            // Cancelled mid-upload; the staging file is not referenced anywhere else
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}
