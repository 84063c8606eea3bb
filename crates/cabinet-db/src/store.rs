use async_trait::async_trait;
use cabinet_core::{
    FilePage, FileQuery, FileRecord, FileUpdate, MetadataBackend, PageRequest, TenantId,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;

/// Persistence contract for file records.
///
/// The tenant argument is applied inside every backend query. A record owned by
/// another tenant behaves exactly like a missing record.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    fn backend_type(&self) -> MetadataBackend;

    /// Insert a new record. Fails with `DuplicateId` if the id is taken.
    async fn create(&self, record: &FileRecord) -> StoreResult<()>;

    /// Fetch a record in any lifecycle state.
    async fn get(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<Option<FileRecord>>;

    /// Mutate an active record. Fails with `NotFound` if the record is missing,
    /// belongs to another tenant, or is no longer active.
    async fn update(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
        update: &FileUpdate,
    ) -> StoreResult<FileRecord>;

    /// Filtered, paginated listing ordered by `created_at` descending then `id`.
    async fn query(
        &self,
        tenant_id: &TenantId,
        query: &FileQuery,
        page: &PageRequest,
    ) -> StoreResult<FilePage<FileRecord>>;

    /// Move an active record to `Tombstoned`. Records already tombstoned or purged
    /// are returned unchanged.
    async fn soft_delete(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<FileRecord>;

    /// Move a tombstoned record to `Purged`. Returns false if it was not tombstoned.
    async fn mark_purged(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<bool>;

    /// Refresh `updated_at` on a tombstoned record after a failed purge, moving it
    /// behind every other due tombstone. Returns false if it is no longer tombstoned.
    async fn defer_purge(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<bool>;

    /// Tombstoned records last touched at or before `cutoff`, oldest first.
    ///
    /// This is the only cross-tenant read; it serves the purge worker.
    async fn list_tombstoned(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<FileRecord>>;

    /// Verify the backend is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Release pooled connections.
    async fn close(&self);
}
