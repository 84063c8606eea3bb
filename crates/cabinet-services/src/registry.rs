//! Content Registry
//!
//! Owns the lifecycle of file records: `Active` once bytes and metadata are both
//! committed, `Tombstoned` on delete, `Purged` once the blob is gone. Bytes are
//! always written before metadata, so a visible record always has retrievable
//! bytes. The tenant is taken from the request context on every call and checked
//! again here after the metadata store has already filtered by it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use cabinet_core::config::PurgeConfig;
use cabinet_core::{
    AppError, Config, FileInfo, FilePage, FileQuery, FileRecord, FileStatus, FileUpdate,
    PageRequest, RetryPolicy, TenantContext, TenantId, UploadPolicy,
};
use cabinet_db::MetadataStore;
use cabinet_storage::keys::tenant_of_key;
use cabinet_storage::Storage;
use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::purge::{purge_record, PurgeReport, PurgeService};
use crate::transfer::{ChunkedTransferEngine, FileStream, InboundStream};

/// Everything the caller supplies for one upload.
pub struct UploadRequest {
    pub filename: String,
    pub content_type: String,
    pub body: InboundStream,
    pub metadata_xml: Option<String>,
    pub tags: Vec<String>,
    /// Declared length, if the transport knows it
    pub expected_size: Option<u64>,
}

/// Mutable metadata fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct MetadataChanges {
    pub filename: Option<String>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` removes the stored XML metadata.
    pub metadata_xml: Option<Option<String>>,
}

fn not_found() -> AppError {
    AppError::NotFound("File not found".to_string())
}

/// A committed blob that has no metadata yet. Dropping it without calling
/// [`PendingBlob::keep`] schedules the blob for deletion.
struct PendingBlob {
    storage: Arc<dyn Storage>,
    storage_key: Option<String>,
}

impl PendingBlob {
    fn new(storage: Arc<dyn Storage>, storage_key: String) -> Self {
        Self {
            storage,
            storage_key: Some(storage_key),
        }
    }

    fn keep(mut self) {
        self.storage_key = None;
    }

    async fn discard(mut self) {
        if let Some(key) = self.storage_key.take() {
            if let Err(e) = self.storage.delete(&key).await {
                tracing::warn!(error = %e, "Failed to delete orphaned blob");
            }
        }
    }
}

impl Drop for PendingBlob {
    fn drop(&mut self) {
        let Some(key) = self.storage_key.take() else {
            return;
        };
        let storage = self.storage.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = storage.delete(&key).await {
                        tracing::warn!(error = %e, "Failed to delete orphaned blob");
                    }
                });
            }
            Err(_) => tracing::warn!("No runtime available to delete orphaned blob"),
        }
    }
}

pub struct ContentRegistry {
    storage: Arc<dyn Storage>,
    store: Arc<dyn MetadataStore>,
    engine: ChunkedTransferEngine,
    policy: UploadPolicy,
    storage_retry: RetryPolicy,
    limiter: Arc<Semaphore>,
    purge: PurgeConfig,
}

impl ContentRegistry {
    pub fn new(config: &Config, storage: Arc<dyn Storage>, store: Arc<dyn MetadataStore>) -> Self {
        let engine = ChunkedTransferEngine::new(
            storage.clone(),
            config.chunk_size,
            config.upload.max_file_size_bytes,
            config.storage_retry,
        );
        Self {
            storage,
            store,
            engine,
            policy: config.upload.clone(),
            storage_retry: config.storage_retry,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            purge: config.purge.clone(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, AppError> {
        self.limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("Content registry is shut down".to_string()))
    }

    pub async fn upload(
        &self,
        ctx: &TenantContext,
        request: UploadRequest,
    ) -> Result<FileInfo, AppError> {
        self.upload_with_cancel(ctx, request, &CancellationToken::new())
            .await
    }

    /// Validate, stream the bytes to storage, then create the `Active` record.
    ///
    /// Any failure leaves no record behind and deletes the blob if it was
    /// already committed.
    pub async fn upload_with_cancel(
        &self,
        ctx: &TenantContext,
        request: UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<FileInfo, AppError> {
        let _permit = self.acquire().await?;
        let tenant_id = ctx.tenant_id();
        let started = Instant::now();

        let validated = self.policy.validate_upload(
            &request.filename,
            &request.content_type,
            request.expected_size,
            request.metadata_xml.as_deref(),
            &request.tags,
        )?;

        let id = Uuid::new_v4();
        let blob_name = format!("{}.{}", id, validated.extension);

        let outcome = self
            .engine
            .upload(
                tenant_id,
                &blob_name,
                &validated.content_type,
                request.body,
                request.expected_size,
                cancel,
            )
            .await?;
        let blob = PendingBlob::new(self.storage.clone(), outcome.storage_key.clone());

        let now = Utc::now();
        let record = FileRecord {
            id,
            tenant_id: tenant_id.clone(),
            filename: validated.filename,
            content_type: validated.content_type,
            size_bytes: outcome.size_bytes,
            checksum_sha256: outcome.checksum_sha256,
            storage_key: outcome.storage_key,
            storage_provider: self.storage.backend_type(),
            metadata_xml: validated.metadata_xml,
            tags: validated.tags,
            status: FileStatus::Active,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.create(&record).await {
            tracing::error!(
                tenant_id = %tenant_id,
                file_id = %id,
                error = %e,
                "Failed to record file metadata, removing blob"
            );
            blob.discard().await;
            return Err(e.into());
        }
        blob.keep();

        tracing::info!(
            tenant_id = %tenant_id,
            file_id = %id,
            request_id = %ctx.request_id,
            size_bytes = record.size_bytes,
            content_type = %record.content_type,
            duration_ms = started.elapsed().as_millis() as u64,
            "File uploaded"
        );

        Ok(record.into())
    }

    /// Resolve an active record owned by the caller.
    async fn active_record(&self, tenant_id: &TenantId, id: Uuid) -> Result<FileRecord, AppError> {
        let record = self
            .store
            .get(tenant_id, id)
            .await?
            .filter(|r| r.is_active())
            .ok_or_else(not_found)?;

        if !record.belongs_to(tenant_id)
            || tenant_of_key(&record.storage_key) != Some(tenant_id.as_str())
        {
            tracing::error!(
                tenant_id = %tenant_id,
                file_id = %id,
                "Record returned by metadata store is not owned by the requesting tenant"
            );
            return Err(not_found());
        }
        Ok(record)
    }

    /// Record plus a lazy stream of its bytes.
    ///
    /// The stream holds a concurrency permit until it is dropped.
    pub async fn fetch(
        &self,
        ctx: &TenantContext,
        id: Uuid,
    ) -> Result<(FileInfo, FileStream), AppError> {
        let permit = self.acquire().await?;
        let record = self.active_record(ctx.tenant_id(), id).await?;

        let stream = self
            .engine
            .download(&record.storage_key, record.size_bytes, Some(permit))
            .await?;

        tracing::debug!(
            tenant_id = %record.tenant_id,
            file_id = %id,
            size_bytes = record.size_bytes,
            "File fetch started"
        );
        Ok((record.into(), stream))
    }

    pub async fn get_info(&self, ctx: &TenantContext, id: Uuid) -> Result<FileInfo, AppError> {
        let _permit = self.acquire().await?;
        Ok(self.active_record(ctx.tenant_id(), id).await?.into())
    }

    pub async fn query(
        &self,
        ctx: &TenantContext,
        query: &FileQuery,
        page: &PageRequest,
    ) -> Result<FilePage<FileInfo>, AppError> {
        let _permit = self.acquire().await?;
        if let (Some(min), Some(max)) = (query.size_min, query.size_max) {
            if min > max {
                return Err(AppError::Validation(
                    "sizeMin must not exceed sizeMax".to_string(),
                ));
            }
        }

        let mut query = query.clone();
        query.tags = self.policy.validate_tags(&query.tags)?;

        let tenant_id = ctx.tenant_id();
        let mut page = self.store.query(tenant_id, &query, page).await?;

        let before = page.items.len();
        page.items.retain(|r| r.belongs_to(tenant_id));
        if page.items.len() != before {
            tracing::error!(
                tenant_id = %tenant_id,
                dropped = before - page.items.len(),
                "Metadata store returned records of another tenant"
            );
        }

        Ok(page.map(FileInfo::from))
    }

    pub async fn update_metadata(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        changes: MetadataChanges,
    ) -> Result<FileInfo, AppError> {
        let _permit = self.acquire().await?;
        let tenant_id = ctx.tenant_id();

        let mut update = FileUpdate::default();
        if let Some(filename) = changes.filename.as_deref() {
            let current = self.active_record(tenant_id, id).await?;
            let (filename, extension) = self.policy.validate_filename(filename)?;
            self.policy
                .validate_content_type(&extension, &current.content_type)?;
            update.filename = Some(filename);
        }
        if let Some(tags) = &changes.tags {
            update.tags = Some(self.policy.validate_tags(tags)?);
        }
        if let Some(metadata_xml) = &changes.metadata_xml {
            update.metadata_xml = Some(
                metadata_xml
                    .as_deref()
                    .map(|raw| self.policy.validate_xml(raw))
                    .transpose()?,
            );
        }

        let record = self.store.update(tenant_id, id, &update).await?;
        tracing::info!(tenant_id = %tenant_id, file_id = %id, "File metadata updated");
        Ok(record.into())
    }

    /// Replace the tag set of a file.
    pub async fn set_tags<S: AsRef<str>>(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        tags: &[S],
    ) -> Result<FileInfo, AppError> {
        let tags: BTreeSet<String> = self.policy.validate_tags(tags)?;
        self.update_metadata(
            ctx,
            id,
            MetadataChanges {
                tags: Some(tags.into_iter().collect()),
                ..MetadataChanges::default()
            },
        )
        .await
    }

    /// Tombstone the record, then try to reclaim the blob right away.
    ///
    /// Deleting a record that is already tombstoned or purged succeeds. A failed
    /// blob delete leaves the record tombstoned for the purge worker.
    pub async fn delete(&self, ctx: &TenantContext, id: Uuid) -> Result<(), AppError> {
        let _permit = self.acquire().await?;
        let tenant_id = ctx.tenant_id();

        let record = self.store.soft_delete(tenant_id, id).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            file_id = %id,
            status = %record.status,
            "File deleted"
        );

        if self.purge.inline && record.status == FileStatus::Tombstoned {
            if let Err(e) = purge_record(
                self.storage.as_ref(),
                self.store.as_ref(),
                &self.storage_retry,
                &record,
            )
            .await
            {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    file_id = %id,
                    error = %e,
                    "Inline purge failed, left for purge worker"
                );
            }
        }
        Ok(())
    }

    /// Run one purge pass over all tenants.
    pub async fn purge_tombstoned(&self) -> Result<PurgeReport, AppError> {
        PurgeService::run_once(&self.storage, &self.store, &self.storage_retry, &self.purge).await
    }

    /// Spawn the background purge worker sharing this registry's backends.
    pub fn start_purge_service(&self) -> PurgeService {
        PurgeService::start(
            self.storage.clone(),
            self.store.clone(),
            self.storage_retry,
            self.purge.clone(),
        )
    }

    /// Refuse new work and release the metadata store's connections.
    pub async fn shutdown(&self) {
        self.limiter.close();
        self.store.close().await;
        tracing::info!("Content registry shut down");
    }
}
