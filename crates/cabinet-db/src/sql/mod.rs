//! File record store over the `sqlx::Any` driver (PostgreSQL, MySQL, SQLite).

mod builder;
mod dialect;

use std::time::Duration;

use async_trait::async_trait;
use cabinet_core::{
    FilePage, FileQuery, FileRecord, FileStatus, FileUpdate, MetadataBackend, PageCursor,
    PageRequest, TenantId,
};
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::codec;
use crate::error::{MetadataError, StoreResult};
use crate::store::MetadataStore;

use builder::SqlBuilder;
pub use dialect::SqlDialect;

const FILE_COLUMNS: &str = "id, tenant_id, filename, content_type, size_bytes, checksum_sha256, \
     storage_key, storage_provider, metadata_xml, metadata_json, tags, status, created_at, updated_at";

fn row_to_record(row: &AnyRow) -> StoreResult<FileRecord> {
    let id: String = row.try_get("id")?;
    let (metadata_xml, metadata_json): (Option<String>, Option<String>) =
        (row.try_get("metadata_xml")?, row.try_get("metadata_json")?);
    let tags: String = row.try_get("tags")?;
    let status: String = row.try_get("status")?;
    let provider: String = row.try_get("storage_provider")?;

    Ok(FileRecord {
        id: Uuid::parse_str(&id).map_err(|e| MetadataError::Corrupt(format!("id: {}", e)))?,
        tenant_id: codec::decode_tenant(row.try_get("tenant_id")?)?,
        filename: row.try_get("filename")?,
        content_type: row.try_get("content_type")?,
        size_bytes: codec::decode_size(row.try_get("size_bytes")?)?,
        checksum_sha256: row.try_get("checksum_sha256")?,
        storage_key: row.try_get("storage_key")?,
        storage_provider: codec::decode_provider(&provider)?,
        metadata_xml: codec::decode_metadata(metadata_xml, metadata_json)?,
        tags: codec::decode_tags(&tags)?,
        status: codec::decode_status(&status)?,
        created_at: codec::from_micros(row.try_get("created_at")?)?,
        updated_at: codec::from_micros(row.try_get("updated_at")?)?,
    })
}

/// SQL metadata store. One implementation serves all three SQL engines; the
/// dialect only changes placeholders and DDL.
#[derive(Clone)]
pub struct SqlMetadataStore {
    pool: AnyPool,
    dialect: SqlDialect,
}

impl SqlMetadataStore {
    /// Connect, then create tables and indexes if they are missing.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> StoreResult<Self> {
        let dialect = SqlDialect::from_url(url).ok_or_else(|| {
            MetadataError::Database("DATABASE_URL is not a postgres, mysql or sqlite URL".into())
        })?;
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| MetadataError::Unavailable(format!("Failed to connect: {}", e)))?;

        tracing::info!(
            dialect = ?dialect,
            max_connections,
            "Metadata store connection pool created"
        );

        Self::new(pool, dialect).await
    }

    /// Wrap an existing pool. Runs the idempotent schema setup.
    pub async fn new(pool: AnyPool, dialect: SqlDialect) -> StoreResult<Self> {
        let store = Self { pool, dialect };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in self.dialect.schema() {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!(dialect = ?self.dialect, "Metadata schema ready");
        Ok(())
    }

    fn builder(&self, initial: &str) -> SqlBuilder {
        SqlBuilder::new(self.dialect, initial)
    }

    async fn fetch_record(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
        status: Option<FileStatus>,
    ) -> StoreResult<Option<FileRecord>> {
        let mut q = self.builder(&format!("SELECT {} FROM files WHERE id = ", FILE_COLUMNS));
        q.push_bind(id.to_string())
            .push(" AND tenant_id = ")
            .push_bind(tenant_id.as_str());
        if let Some(status) = status {
            q.push(" AND status = ").push_bind(status.as_str());
        }

        let row = q.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_record).transpose()
    }

    /// Append the WHERE clause shared by the page query and the count query.
    fn push_filters(
        &self,
        q: &mut SqlBuilder,
        tenant_id: &TenantId,
        query: &FileQuery,
        cursor: Option<&PageCursor>,
    ) {
        q.push(" WHERE f.tenant_id = ")
            .push_bind(tenant_id.as_str())
            .push(" AND f.status = ")
            .push_bind(query.effective_status().as_str());

        if let Some(needle) = query.filename_contains.as_deref().filter(|n| !n.is_empty()) {
            q.push(" AND f.filename_lower LIKE ")
                .push_bind(codec::like_pattern(needle))
                .push(" ESCAPE '!'");
        }
        if let Some(content_type) = &query.content_type {
            q.push(" AND f.content_type = ")
                .push_bind(content_type.to_lowercase());
        }
        if let Some(min) = query.size_min {
            q.push(" AND f.size_bytes >= ").push_bind(codec::size_bound(min));
        }
        if let Some(max) = query.size_max {
            q.push(" AND f.size_bytes <= ").push_bind(codec::size_bound(max));
        }
        if let Some(after) = query.created_after {
            q.push(" AND f.created_at >= ").push_bind(codec::to_micros(after));
        }
        if let Some(before) = query.created_before {
            q.push(" AND f.created_at < ").push_bind(codec::to_micros(before));
        }
        let tags = codec::query_tags(&query.tags);
        if !tags.is_empty() {
            let required = tags.len() as i64;
            q.push(" AND f.id IN (SELECT t.file_id FROM file_tags t WHERE t.tenant_id = ")
                .push_bind(tenant_id.as_str())
                .push(" AND t.tag IN (")
                .push_bind_list(tags)
                .push(") GROUP BY t.file_id HAVING COUNT(*) = ")
                .push_bind(required)
                .push(")");
        }
        if let Some(cursor) = cursor {
            q.push(" AND (f.created_at < ")
                .push_bind(cursor.created_at_micros)
                .push(" OR (f.created_at = ")
                .push_bind(cursor.created_at_micros)
                .push(" AND f.id > ")
                .push_bind(cursor.id.to_string())
                .push("))");
        }
    }
}

async fn replace_tags(
    conn: &mut sqlx::AnyConnection,
    dialect: SqlDialect,
    record: &FileRecord,
    clear_existing: bool,
) -> StoreResult<()> {
    if clear_existing {
        let mut q = SqlBuilder::new(dialect, "DELETE FROM file_tags WHERE file_id = ");
        q.push_bind(record.id.to_string())
            .push(" AND tenant_id = ")
            .push_bind(record.tenant_id.as_str());
        q.build().execute(&mut *conn).await?;
    }
    for tag in &record.tags {
        let mut q = SqlBuilder::new(
            dialect,
            "INSERT INTO file_tags (file_id, tenant_id, tag) VALUES (",
        );
        q.push_bind(record.id.to_string())
            .push(", ")
            .push_bind(record.tenant_id.as_str())
            .push(", ")
            .push_bind(tag.as_str())
            .push(")");
        q.build().execute(&mut *conn).await?;
    }
    Ok(())
}

#[async_trait]
impl MetadataStore for SqlMetadataStore {
    fn backend_type(&self) -> MetadataBackend {
        self.dialect.backend()
    }

    #[tracing::instrument(skip(self, record), fields(db.table = "files", db.operation = "insert", db.record_id = %record.id))]
    async fn create(&self, record: &FileRecord) -> StoreResult<()> {
        let (metadata_xml, metadata_json) = codec::encode_metadata(record.metadata_xml.as_ref());

        let mut q = self.builder(&format!(
            "INSERT INTO files ({}, filename_lower) VALUES (",
            FILE_COLUMNS
        ));
        q.push_bind(record.id.to_string())
            .push(", ")
            .push_bind(record.tenant_id.as_str())
            .push(", ")
            .push_bind(record.filename.as_str())
            .push(", ")
            .push_bind(record.content_type.as_str())
            .push(", ")
            .push_bind(record.size_bytes as i64)
            .push(", ")
            .push_bind(record.checksum_sha256.as_str())
            .push(", ")
            .push_bind(record.storage_key.as_str())
            .push(", ")
            .push_bind(record.storage_provider.to_string())
            .push(", ")
            .push_bind(metadata_xml)
            .push(", ")
            .push_bind(metadata_json)
            .push(", ")
            .push_bind(codec::encode_tags(&record.tags))
            .push(", ")
            .push_bind(record.status.as_str())
            .push(", ")
            .push_bind(codec::to_micros(record.created_at))
            .push(", ")
            .push_bind(codec::to_micros(record.updated_at))
            .push(", ")
            .push_bind(record.filename.to_lowercase())
            .push(")");

        let mut tx = self.pool.begin().await?;
        q.build().execute(&mut *tx).await?;
        replace_tags(&mut tx, self.dialect, record, false).await?;
        tx.commit().await?;

        tracing::debug!(tenant_id = %record.tenant_id, "File record created");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select", db.record_id = %id))]
    async fn get(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<Option<FileRecord>> {
        self.fetch_record(tenant_id, id, None).await
    }

    #[tracing::instrument(skip(self, update), fields(db.table = "files", db.operation = "update", db.record_id = %id))]
    async fn update(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
        update: &FileUpdate,
    ) -> StoreResult<FileRecord> {
        let mut record = self
            .fetch_record(tenant_id, id, Some(FileStatus::Active))
            .await?
            .ok_or(MetadataError::NotFound)?;
        if update.is_empty() {
            return Ok(record);
        }
        update.apply_to(&mut record, Utc::now());

        let (metadata_xml, metadata_json) = codec::encode_metadata(record.metadata_xml.as_ref());
        let mut q = self.builder("UPDATE files SET filename = ");
        q.push_bind(record.filename.as_str())
            .push(", filename_lower = ")
            .push_bind(record.filename.to_lowercase())
            .push(", metadata_xml = ")
            .push_bind(metadata_xml)
            .push(", metadata_json = ")
            .push_bind(metadata_json)
            .push(", tags = ")
            .push_bind(codec::encode_tags(&record.tags))
            .push(", updated_at = ")
            .push_bind(codec::to_micros(record.updated_at))
            .push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND tenant_id = ")
            .push_bind(tenant_id.as_str())
            .push(" AND status = ")
            .push_bind(FileStatus::Active.as_str());

        let mut tx = self.pool.begin().await?;
        let result = q.build().execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            // Deleted between the read and the write
            tx.rollback().await?;
            return Err(MetadataError::NotFound);
        }
        if update.tags.is_some() {
            replace_tags(&mut tx, self.dialect, &record, true).await?;
        }
        tx.commit().await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self, query, page), fields(db.table = "files", db.operation = "select"))]
    async fn query(
        &self,
        tenant_id: &TenantId,
        query: &FileQuery,
        page: &PageRequest,
    ) -> StoreResult<FilePage<FileRecord>> {
        let limit = page.effective_limit();

        let mut count = self.builder("SELECT COUNT(*) AS total FROM files f");
        self.push_filters(&mut count, tenant_id, query, None);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("total")?;

        let mut select = self.builder(&format!("SELECT {} FROM files f", prefixed_columns()));
        self.push_filters(&mut select, tenant_id, query, page.cursor.as_ref());
        select
            .push(" ORDER BY f.created_at DESC, f.id ASC LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(page.effective_offset() as i64);

        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(row_to_record)
            .collect::<StoreResult<Vec<_>>>()?;

        let next_cursor = if items.len() == limit as usize {
            items
                .last()
                .map(|last| PageCursor::new(last.created_at, last.id).encode())
        } else {
            None
        };

        Ok(FilePage {
            items,
            total: total.max(0) as u64,
            next_cursor,
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "update", db.record_id = %id))]
    async fn soft_delete(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<FileRecord> {
        let mut q = self.builder("UPDATE files SET status = ");
        q.push_bind(FileStatus::Tombstoned.as_str())
            .push(", updated_at = ")
            .push_bind(codec::to_micros(Utc::now()))
            .push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND tenant_id = ")
            .push_bind(tenant_id.as_str())
            .push(" AND status = ")
            .push_bind(FileStatus::Active.as_str());
        q.build().execute(&self.pool).await?;

        self.fetch_record(tenant_id, id, None)
            .await?
            .ok_or(MetadataError::NotFound)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "update", db.record_id = %id))]
    async fn mark_purged(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<bool> {
        let mut q = self.builder("UPDATE files SET status = ");
        q.push_bind(FileStatus::Purged.as_str())
            .push(", updated_at = ")
            .push_bind(codec::to_micros(Utc::now()))
            .push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND tenant_id = ")
            .push_bind(tenant_id.as_str())
            .push(" AND status = ")
            .push_bind(FileStatus::Tombstoned.as_str());

        let mut tags = self.builder("DELETE FROM file_tags WHERE file_id = ");
        tags.push_bind(id.to_string())
            .push(" AND tenant_id = ")
            .push_bind(tenant_id.as_str());

        let mut tx = self.pool.begin().await?;
        let result = q.build().execute(&mut *tx).await?;
        if result.rows_affected() > 0 {
            tags.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "update", db.record_id = %id))]
    async fn defer_purge(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<bool> {
        let mut q = self.builder("UPDATE files SET updated_at = ");
        q.push_bind(codec::to_micros(Utc::now()))
            .push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND tenant_id = ")
            .push_bind(tenant_id.as_str())
            .push(" AND status = ")
            .push_bind(FileStatus::Tombstoned.as_str());
        let result = q.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    async fn list_tombstoned(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<FileRecord>> {
        let mut q = self.builder(&format!("SELECT {} FROM files WHERE status = ", FILE_COLUMNS));
        q.push_bind(FileStatus::Tombstoned.as_str())
            .push(" AND updated_at <= ")
            .push_bind(codec::to_micros(cutoff))
            .push(" ORDER BY updated_at ASC, id ASC LIMIT ")
            .push_bind(limit as i64);

        let rows = q.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn prefixed_columns() -> String {
    FILE_COLUMNS
        .split(", ")
        .map(|c| format!("f.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
