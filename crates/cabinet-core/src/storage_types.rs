use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Storage backend types
///
/// Recorded on every file record so bytes are always read back from the backend that
/// wrote them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Azure,
    Gcp,
    Aws,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "azure" => Ok(StorageBackend::Azure),
            "gcp" | "gcs" => Ok(StorageBackend::Gcp),
            "aws" | "s3" => Ok(StorageBackend::Aws),
            _ => Err(anyhow::anyhow!("Invalid storage backend: {}", s)),
        }
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageBackend::Local => write!(f, "local"),
            StorageBackend::Azure => write!(f, "azure"),
            StorageBackend::Gcp => write!(f, "gcp"),
            StorageBackend::Aws => write!(f, "aws"),
        }
    }
}

/// Metadata store backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    Postgres,
    MySql,
    Sqlite,
    MongoDb,
}

impl MetadataBackend {
    pub fn is_sql(&self) -> bool {
        !matches!(self, MetadataBackend::MongoDb)
    }
}

impl FromStr for MetadataBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(MetadataBackend::Postgres),
            "mysql" => Ok(MetadataBackend::MySql),
            "sqlite" => Ok(MetadataBackend::Sqlite),
            "mongodb" | "mongo" => Ok(MetadataBackend::MongoDb),
            _ => Err(anyhow::anyhow!("Invalid metadata backend: {}", s)),
        }
    }
}

impl Display for MetadataBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MetadataBackend::Postgres => write!(f, "postgres"),
            MetadataBackend::MySql => write!(f, "mysql"),
            MetadataBackend::Sqlite => write!(f, "sqlite"),
            MetadataBackend::MongoDb => write!(f, "mongodb"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_round_trips_through_display() {
        for backend in [
            StorageBackend::Local,
            StorageBackend::Azure,
            StorageBackend::Gcp,
            StorageBackend::Aws,
        ] {
            assert_eq!(backend.to_string().parse::<StorageBackend>().unwrap(), backend);
        }
        assert_eq!("S3".parse::<StorageBackend>().unwrap(), StorageBackend::Aws);
        assert!("nfs".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_metadata_backend_aliases() {
        assert_eq!(
            "postgresql".parse::<MetadataBackend>().unwrap(),
            MetadataBackend::Postgres
        );
        assert!(!MetadataBackend::MongoDb.is_sql());
        assert!(MetadataBackend::Sqlite.is_sql());
    }
}
