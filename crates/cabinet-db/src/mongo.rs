//! MongoDB implementation of [`MetadataStore`].
//!
//! Records live in one `files` collection. Documents carry the same encodings
//! as the SQL columns (microsecond timestamps, JSON metadata text) so query
//! ordering and cursors behave identically across backends.

use async_trait::async_trait;
use bson::{doc, Document};
use cabinet_core::{
    FilePage, FileQuery, FileRecord, FileStatus, FileUpdate, MetadataBackend, PageCursor,
    PageRequest, TenantId,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::FindOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec;
use crate::error::{MetadataError, StoreResult};
use crate::store::MetadataStore;

const COLLECTION: &str = "files";
const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileDocument {
    #[serde(rename = "_id")]
    id: String,
    tenant_id: String,
    filename: String,
    filename_lower: String,
    content_type: String,
    size_bytes: i64,
    checksum_sha256: String,
    storage_key: String,
    storage_provider: String,
    metadata_xml: Option<String>,
    metadata_json: Option<String>,
    tags: Vec<String>,
    status: String,
    created_at: i64,
    updated_at: i64,
}

impl From<&FileRecord> for FileDocument {
    fn from(record: &FileRecord) -> Self {
        let (metadata_xml, metadata_json) = codec::encode_metadata(record.metadata_xml.as_ref());
        Self {
            id: record.id.to_string(),
            tenant_id: record.tenant_id.to_string(),
            filename: record.filename.clone(),
            filename_lower: record.filename.to_lowercase(),
            content_type: record.content_type.clone(),
            size_bytes: record.size_bytes as i64,
            checksum_sha256: record.checksum_sha256.clone(),
            storage_key: record.storage_key.clone(),
            storage_provider: record.storage_provider.to_string(),
            metadata_xml,
            metadata_json,
            tags: record.tags.iter().cloned().collect(),
            status: record.status.as_str().to_string(),
            created_at: codec::to_micros(record.created_at),
            updated_at: codec::to_micros(record.updated_at),
        }
    }
}

impl TryFrom<FileDocument> for FileRecord {
    type Error = MetadataError;

    fn try_from(doc: FileDocument) -> StoreResult<Self> {
        Ok(FileRecord {
            id: Uuid::parse_str(&doc.id)
                .map_err(|e| MetadataError::Corrupt(format!("_id: {}", e)))?,
            tenant_id: codec::decode_tenant(doc.tenant_id)?,
            filename: doc.filename,
            content_type: doc.content_type,
            size_bytes: codec::decode_size(doc.size_bytes)?,
            checksum_sha256: doc.checksum_sha256,
            storage_key: doc.storage_key,
            storage_provider: codec::decode_provider(&doc.storage_provider)?,
            metadata_xml: codec::decode_metadata(doc.metadata_xml, doc.metadata_json)?,
            tags: doc.tags.into_iter().collect(),
            status: codec::decode_status(&doc.status)?,
            created_at: codec::from_micros(doc.created_at)?,
            updated_at: codec::from_micros(doc.updated_at)?,
        })
    }
}

impl From<mongodb::error::Error> for MetadataError {
    fn from(err: mongodb::error::Error) -> Self {
        match err.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY => {
                MetadataError::DuplicateId(write.message.clone())
            }
            ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => MetadataError::Unavailable(err.to_string()),
            ErrorKind::BsonDeserialization(_) => MetadataError::Corrupt(err.to_string()),
            _ => MetadataError::Database(err.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct MongoMetadataStore {
    client: Client,
    database: Database,
    files: Collection<FileDocument>,
}

impl MongoMetadataStore {
    pub async fn connect(uri: &str, database: &str) -> StoreResult<Self> {
        // Fail fast when the server is unreachable instead of blocking on selection
        let uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&uri)
            .await
            .map_err(|e| MetadataError::Unavailable(format!("Failed to connect to MongoDB: {}", e)))?;
        let database = client.database(database);
        let files = database.collection::<FileDocument>(COLLECTION);

        let store = Self {
            client,
            database,
            files,
        };
        store.ping().await?;
        store.apply_indexes().await?;

        tracing::info!(database = %store.database.name(), "Connected to MongoDB metadata store");
        Ok(store)
    }

    async fn apply_indexes(&self) -> StoreResult<()> {
        let indexes = vec![
            IndexModel::builder()
                .keys(doc! { "tenant_id": 1, "status": 1, "created_at": -1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "tenant_id": 1, "tags": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "status": 1, "updated_at": 1 })
                .build(),
        ];
        self.files.create_indexes(indexes).await?;
        Ok(())
    }

    fn filter(&self, tenant_id: &TenantId, query: &FileQuery) -> Document {
        let mut filter = doc! {
            "tenant_id": tenant_id.as_str(),
            "status": query.effective_status().as_str(),
        };

        if let Some(needle) = query.filename_contains.as_deref().filter(|n| !n.is_empty()) {
            filter.insert(
                "filename_lower",
                doc! { "$regex": regex::escape(&needle.to_lowercase()) },
            );
        }
        if let Some(content_type) = &query.content_type {
            filter.insert("content_type", content_type.to_lowercase());
        }

        let mut size = Document::new();
        if let Some(min) = query.size_min {
            size.insert("$gte", codec::size_bound(min));
        }
        if let Some(max) = query.size_max {
            size.insert("$lte", codec::size_bound(max));
        }
        if !size.is_empty() {
            filter.insert("size_bytes", size);
        }

        let mut created = Document::new();
        if let Some(after) = query.created_after {
            created.insert("$gte", codec::to_micros(after));
        }
        if let Some(before) = query.created_before {
            created.insert("$lt", codec::to_micros(before));
        }
        if !created.is_empty() {
            filter.insert("created_at", created);
        }

        let tags = codec::query_tags(&query.tags);
        if !tags.is_empty() {
            let tags: Vec<String> = tags.into_iter().collect();
            filter.insert("tags", doc! { "$all": tags });
        }
        filter
    }

    async fn find_record(&self, filter: Document) -> StoreResult<Option<FileRecord>> {
        self.files
            .find_one(filter)
            .await?
            .map(FileRecord::try_from)
            .transpose()
    }
}

#[async_trait]
impl MetadataStore for MongoMetadataStore {
    fn backend_type(&self) -> MetadataBackend {
        MetadataBackend::MongoDb
    }

    #[tracing::instrument(skip(self, record), fields(db.collection = COLLECTION, db.operation = "insert", db.record_id = %record.id))]
    async fn create(&self, record: &FileRecord) -> StoreResult<()> {
        self.files.insert_one(FileDocument::from(record)).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.collection = COLLECTION, db.operation = "find", db.record_id = %id))]
    async fn get(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<Option<FileRecord>> {
        self.find_record(doc! { "_id": id.to_string(), "tenant_id": tenant_id.as_str() })
            .await
    }

    #[tracing::instrument(skip(self, update), fields(db.collection = COLLECTION, db.operation = "update", db.record_id = %id))]
    async fn update(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
        update: &FileUpdate,
    ) -> StoreResult<FileRecord> {
        let active = doc! {
            "_id": id.to_string(),
            "tenant_id": tenant_id.as_str(),
            "status": FileStatus::Active.as_str(),
        };
        let mut record = self
            .find_record(active.clone())
            .await?
            .ok_or(MetadataError::NotFound)?;
        if update.is_empty() {
            return Ok(record);
        }
        update.apply_to(&mut record, Utc::now());

        let document = FileDocument::from(&record);
        let result = self
            .files
            .update_one(
                active,
                doc! { "$set": {
                    "filename": document.filename,
                    "filename_lower": document.filename_lower,
                    "metadata_xml": document.metadata_xml,
                    "metadata_json": document.metadata_json,
                    "tags": document.tags,
                    "updated_at": document.updated_at,
                }},
            )
            .await?;
        if result.matched_count == 0 {
            return Err(MetadataError::NotFound);
        }
        Ok(record)
    }

    #[tracing::instrument(skip(self, query, page), fields(db.collection = COLLECTION, db.operation = "find"))]
    async fn query(
        &self,
        tenant_id: &TenantId,
        query: &FileQuery,
        page: &PageRequest,
    ) -> StoreResult<FilePage<FileRecord>> {
        let limit = page.effective_limit();
        let filter = self.filter(tenant_id, query);
        let total = self.files.count_documents(filter.clone()).await?;

        let mut page_filter = filter;
        if let Some(cursor) = &page.cursor {
            page_filter.insert(
                "$or",
                vec![
                    doc! { "created_at": { "$lt": cursor.created_at_micros } },
                    doc! {
                        "created_at": cursor.created_at_micros,
                        "_id": { "$gt": cursor.id.to_string() },
                    },
                ],
            );
        }

        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1, "_id": 1 })
            .skip(page.effective_offset() as u64)
            .limit(limit as i64)
            .build();
        let documents: Vec<FileDocument> = self
            .files
            .find(page_filter)
            .with_options(options)
            .await?
            .try_collect()
            .await?;
        let items = documents
            .into_iter()
            .map(FileRecord::try_from)
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
            total,
            next_cursor,
        })
    }

    #[tracing::instrument(skip(self), fields(db.collection = COLLECTION, db.operation = "update", db.record_id = %id))]
    async fn soft_delete(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<FileRecord> {
        self.files
            .update_one(
                doc! {
                    "_id": id.to_string(),
                    "tenant_id": tenant_id.as_str(),
                    "status": FileStatus::Active.as_str(),
                },
                doc! { "$set": {
                    "status": FileStatus::Tombstoned.as_str(),
                    "updated_at": codec::to_micros(Utc::now()),
                }},
            )
            .await?;

        self.get(tenant_id, id).await?.ok_or(MetadataError::NotFound)
    }

    #[tracing::instrument(skip(self), fields(db.collection = COLLECTION, db.operation = "update", db.record_id = %id))]
    async fn mark_purged(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<bool> {
        let result = self
            .files
            .update_one(
                doc! {
                    "_id": id.to_string(),
                    "tenant_id": tenant_id.as_str(),
                    "status": FileStatus::Tombstoned.as_str(),
                },
                doc! { "$set": {
                    "status": FileStatus::Purged.as_str(),
                    "updated_at": codec::to_micros(Utc::now()),
                }},
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    #[tracing::instrument(skip(self), fields(db.collection = COLLECTION, db.operation = "update", db.record_id = %id))]
    async fn defer_purge(&self, tenant_id: &TenantId, id: Uuid) -> StoreResult<bool> {
        let result = self
            .files
            .update_one(
                doc! {
                    "_id": id.to_string(),
                    "tenant_id": tenant_id.as_str(),
                    "status": FileStatus::Tombstoned.as_str(),
                },
                doc! { "$set": { "updated_at": codec::to_micros(Utc::now()) } },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    #[tracing::instrument(skip(self), fields(db.collection = COLLECTION, db.operation = "find"))]
    async fn list_tombstoned(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<FileRecord>> {
        let options = FindOptions::builder()
            .sort(doc! { "updated_at": 1, "_id": 1 })
            .limit(limit as i64)
            .build();
        let documents: Vec<FileDocument> = self
            .files
            .find(doc! {
                "status": FileStatus::Tombstoned.as_str(),
                "updated_at": { "$lte": codec::to_micros(cutoff) },
            })
            .with_options(options)
            .await?
            .try_collect()
            .await?;

        documents.into_iter().map(FileRecord::try_from).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| MetadataError::Unavailable(format!("MongoDB ping failed: {}", e)))?;
        Ok(())
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabinet_core::StorageBackend;
    use std::collections::BTreeSet;

    fn record() -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: Uuid::new_v4(),
            tenant_id: TenantId::parse("acme").unwrap(),
            filename: "Report.PDF".to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 2_400_000,
            checksum_sha256: "ab".repeat(32),
            storage_key: "tenants/acme/files/x.pdf".to_string(),
            storage_provider: StorageBackend::Aws,
            metadata_xml: None,
            tags: BTreeSet::from(["finance".to_string()]),
            status: FileStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_document_round_trip_preserves_record() {
        let original = record();
        let document = FileDocument::from(&original);
        assert_eq!(document.filename_lower, "report.pdf");
        assert_eq!(document.id, original.id.to_string());

        let back = FileRecord::try_from(document).unwrap();
        assert_eq!(back.id, original.id);
        assert_eq!(back.tags, original.tags);
        assert_eq!(back.storage_provider, StorageBackend::Aws);
    }

    #[test]
    fn test_negative_size_is_corrupt() {
        let mut document = FileDocument::from(&record());
        document.size_bytes = -1;
        assert!(matches!(
            FileRecord::try_from(document),
            Err(MetadataError::Corrupt(_))
        ));
    }
}
