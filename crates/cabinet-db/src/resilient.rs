use std::sync::Arc;

use async_trait::async_trait;
use cabinet_core::{
    retry, FilePage, FileQuery, FileRecord, FileUpdate, MetadataBackend, PageRequest, RetryPolicy,
    TenantId,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{MetadataError, StoreResult};
use crate::store::MetadataStore;

/// Decorator that bounds every call with a timeout and retries transient failures.
///
/// A create that timed out may still have committed. When a later attempt then
/// reports `DuplicateId`, the stored record is read back and accepted if it is the
/// one being written.
pub struct ResilientMetadataStore {
    inner: Arc<dyn MetadataStore>,
    policy: RetryPolicy,
}

impl ResilientMetadataStore {
    pub fn new(inner: Arc<dyn MetadataStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl MetadataStore for ResilientMetadataStore {
    fn backend_type(&self) -> MetadataBackend {
        self.inner.backend_type()
    }

    async fn create(&self, record: &FileRecord) -> StoreResult<()> {
        let mut attempts = 0u32;
        let result = retry(&self.policy, "metadata.create", || {
            attempts += 1;
            self.inner.create(record)
        })
        .await;

        match result {
            Err(MetadataError::DuplicateId(msg)) if attempts > 1 => {
                let stored = self.inner.get(&record.tenant_id, record.id).await?;
                match stored {
                    Some(existing)
                        if existing.storage_key == record.storage_key
                            && existing.checksum_sha256 == record.checksum_sha256 =>
                    {
                        tracing::info!(
                            file_id = %record.id,
                            attempts,
                            "Create committed by an earlier attempt"
                        );
                        Ok(())
                    }
                    _ => Err(MetadataError::DuplicateId(msg)),
                }
            }
            other => other,
        }
    }

    async fn get(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<Option<FileRecord>> {
        retry(&self.policy, "metadata.get", || self.inner.get(tenant_id, id)).await
    }

    async fn update(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
        update: &FileUpdate,
    ) -> StoreResult<FileRecord> {
        retry(&self.policy, "metadata.update", || {
            self.inner.update(tenant_id, id, update)
        })
        .await
    }

    async fn query(
        &self,
        tenant_id: &TenantId,
        query: &FileQuery,
        page: &PageRequest,
    ) -> StoreResult<FilePage<FileRecord>> {
        retry(&self.policy, "metadata.query", || {
            self.inner.query(tenant_id, query, page)
        })
        .await
    }

    async fn soft_delete(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<FileRecord> {
        retry(&self.policy, "metadata.soft_delete", || {
            self.inner.soft_delete(tenant_id, id)
        })
        .await
    }

    async fn mark_purged(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<bool> {
        retry(&self.policy, "metadata.mark_purged", || {
            self.inner.mark_purged(tenant_id, id)
        })
        .await
    }

    async fn defer_purge(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<bool> {
        retry(&self.policy, "metadata.defer_purge", || {
            self.inner.defer_purge(tenant_id, id)
        })
        .await
    }

    async fn list_tombstoned(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<FileRecord>> {
        retry(&self.policy, "metadata.list_tombstoned", || {
            self.inner.list_tombstoned(cutoff, limit)
        })
        .await
    }

    async fn ping(&self) -> StoreResult<()> {
        retry(&self.policy, "metadata.ping", || self.inner.ping()).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabinet_core::{FileStatus, StorageBackend};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Store whose first create commits but reports a timeout.
    #[derive(Default)]
    struct LossyStore {
        records: Mutex<Vec<FileRecord>>,
        creates: AtomicU32,
        gets: AtomicU32,
        fail_gets: u32,
    }

    #[async_trait]
    impl MetadataStore for LossyStore {
        fn backend_type(&self) -> MetadataBackend {
            MetadataBackend::Sqlite
        }

        async fn create(&self, record: &FileRecord) -> StoreResult<()> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            let mut records = self.records.lock().unwrap();
            if records.iter().any(|r| r.id == record.id) {
                return Err(MetadataError::DuplicateId(record.id.to_string()));
            }
            records.push(record.clone());
            if n == 0 {
                return Err(MetadataError::Unavailable("connection reset".into()));
            }
            Ok(())
        }

        async fn get(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<Option<FileRecord>> {
            let n = self.gets.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_gets {
                return Err(MetadataError::Unavailable("pool timed out".into()));
            }
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .find(|r| r.id == id && &r.tenant_id == tenant_id)
                .cloned())
        }

        async fn update(&self, _: &TenantId, _: Uuid, _: &FileUpdate) -> StoreResult<FileRecord> {
            Err(MetadataError::NotFound)
        }

        async fn query(
            &self,
            _: &TenantId,
            _: &FileQuery,
            _: &PageRequest,
        ) -> StoreResult<FilePage<FileRecord>> {
            Ok(FilePage {
                items: Vec::new(),
                total: 0,
                next_cursor: None,
            })
        }

        async fn soft_delete(&self, _: &TenantId, _: Uuid) -> StoreResult<FileRecord> {
            Err(MetadataError::NotFound)
        }

        async fn mark_purged(&self, _: &TenantId, _: Uuid) -> StoreResult<bool> {
            Ok(false)
        }

        async fn defer_purge(&self, _: &TenantId, _: Uuid) -> StoreResult<bool> {
            Ok(false)
        }

        async fn list_tombstoned(&self, _: DateTime<Utc>, _: u32) -> StoreResult<Vec<FileRecord>> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> StoreResult<()> {
            Ok(())
        }

        async fn close(&self) {}
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn record() -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: Uuid::new_v4(),
            tenant_id: TenantId::parse("acme").unwrap(),
            filename: "a.txt".to_string(),
            content_type: "text/plain".to_string(),
            size_bytes: 3,
            checksum_sha256: "cd".repeat(32),
            storage_key: "tenants/acme/files/a.txt".to_string(),
            storage_provider: StorageBackend::Local,
            metadata_xml: None,
            tags: BTreeSet::new(),
            status: FileStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_accepts_record_committed_by_failed_attempt() {
        let inner = Arc::new(LossyStore::default());
        let store = ResilientMetadataStore::new(inner.clone(), policy());

        let record = record();
        store.create(&record).await.unwrap();
        assert_eq!(inner.creates.load(Ordering::SeqCst), 2);
        assert_eq!(inner.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_on_first_attempt_is_a_conflict() {
        let inner = Arc::new(LossyStore::default());
        let existing = record();
        inner.records.lock().unwrap().push(existing.clone());
        inner.creates.store(1, Ordering::SeqCst);

        let store = ResilientMetadataStore::new(inner, policy());
        let err = store.create(&existing).await.unwrap_err();
        assert!(matches!(err, MetadataError::DuplicateId(_)));
    }

    #[tokio::test]
    async fn test_transient_reads_are_retried() {
        let inner = Arc::new(LossyStore {
            fail_gets: 2,
            ..Default::default()
        });
        let store = ResilientMetadataStore::new(inner.clone(), policy());

        let found = store
            .get(&TenantId::parse("acme").unwrap(), Uuid::new_v4())
            .await
            .unwrap();
        assert!(found.is_none());
        assert_eq!(inner.gets.load(Ordering::SeqCst), 3);
    }
}
