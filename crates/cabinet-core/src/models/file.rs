use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage_types::StorageBackend;
use crate::tenant::TenantId;

/// Lifecycle state of a file record.
///
/// `Pending` has no representation: a record only exists once its bytes are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Active,
    Tombstoned,
    Purged,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Active => "active",
            FileStatus::Tombstoned => "tombstoned",
            FileStatus::Purged => "purged",
        }
    }
}

impl FromStr for FileStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(FileStatus::Active),
            "tombstoned" => Ok(FileStatus::Tombstoned),
            "purged" => Ok(FileStatus::Purged),
            _ => Err(anyhow::anyhow!("Invalid file status: {}", s)),
        }
    }
}

impl Display for FileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Structured metadata supplied as an XML document at upload time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XmlMetadata {
    /// Original document text
    pub raw: String,
    /// Element tree converted to JSON (attributes as `@name`, text as `#text`)
    pub parsed: serde_json::Value,
}

/// Full file record as persisted by the metadata store.
///
/// `storage_key` is an opaque locator owned by the storage provider that wrote the
/// bytes. It never leaves the service layer; callers receive [`FileInfo`].
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub checksum_sha256: String,
    pub storage_key: String,
    pub storage_provider: StorageBackend,
    pub metadata_xml: Option<XmlMetadata>,
    pub tags: BTreeSet<String>,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_active(&self) -> bool {
        self.status == FileStatus::Active
    }

    pub fn belongs_to(&self, tenant_id: &TenantId) -> bool {
        &self.tenant_id == tenant_id
    }
}

/// Caller-facing view of a file record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub checksum_sha256: String,
    pub storage_provider: StorageBackend,
    pub metadata_xml: Option<XmlMetadata>,
    pub tags: BTreeSet<String>,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FileRecord> for FileInfo {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.id,
            tenant_id: record.tenant_id,
            filename: record.filename,
            content_type: record.content_type,
            size_bytes: record.size_bytes,
            checksum_sha256: record.checksum_sha256,
            storage_provider: record.storage_provider,
            metadata_xml: record.metadata_xml,
            tags: record.tags,
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Mutable fields of a file record. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileUpdate {
    pub filename: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    /// `Some(None)` clears the stored XML metadata.
    pub metadata_xml: Option<Option<XmlMetadata>>,
}

impl FileUpdate {
    pub fn is_empty(&self) -> bool {
        self.filename.is_none() && self.tags.is_none() && self.metadata_xml.is_none()
    }

    /// Apply the update to an in-memory record.
    pub fn apply_to(&self, record: &mut FileRecord, now: DateTime<Utc>) {
        if let Some(filename) = &self.filename {
            record.filename = filename.clone();
        }
        if let Some(tags) = &self.tags {
            record.tags = tags.clone();
        }
        if let Some(metadata_xml) = &self.metadata_xml {
            record.metadata_xml = metadata_xml.clone();
        }
        record.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: Uuid::new_v4(),
            tenant_id: TenantId::parse("t1").unwrap(),
            filename: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 42,
            checksum_sha256: "ab".repeat(32),
            storage_key: "tenants/t1/files/x.pdf".to_string(),
            storage_provider: StorageBackend::Local,
            metadata_xml: None,
            tags: BTreeSet::new(),
            status: FileStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_file_info_omits_storage_key() {
        let info = FileInfo::from(record());
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("storage_key"));
        assert!(!json.contains("tenants/t1/files"));
        assert!(json.contains("\"status\":\"active\""));
    }

    #[test]
    fn test_update_only_touches_given_fields() {
        let mut rec = record();
        let later = rec.updated_at + chrono::Duration::seconds(5);
        let update = FileUpdate {
            tags: Some(BTreeSet::from(["finance".to_string()])),
            ..Default::default()
        };
        update.apply_to(&mut rec, later);
        assert_eq!(rec.filename, "report.pdf");
        assert!(rec.tags.contains("finance"));
        assert_eq!(rec.updated_at, later);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Tombstoned".parse::<FileStatus>().unwrap(), FileStatus::Tombstoned);
        assert!("pending".parse::<FileStatus>().is_err());
    }
}
