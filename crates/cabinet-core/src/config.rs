//! Configuration module
//!
//! Configuration is read once at process start and passed by reference into the
//! storage, metadata store and registry constructors. Nothing re-reads the
//! environment per request.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::storage_types::{MetadataBackend, StorageBackend};
use crate::validation::{derive_content_types, UploadPolicy, DEFAULT_ALLOWED_EXTENSIONS};

const MAX_FILE_SIZE_MB: u64 = 100;
const CHUNK_SIZE_BYTES: usize = 8192;
const MAX_XML_METADATA_BYTES: usize = 1024 * 1024;
const MAX_TAGS: usize = 32;
const DB_MAX_CONNECTIONS: u32 = 10;
const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const RETRY_MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;
const RETRY_MAX_DELAY_MS: u64 = 2000;
const STORAGE_TIMEOUT_SECS: u64 = 30;
const STORE_TIMEOUT_SECS: u64 = 10;
const MAX_CONCURRENT_REQUESTS: usize = 64;
const PURGE_INTERVAL_SECS: u64 = 60;
const PURGE_GRACE_SECS: u64 = 0;
const PURGE_BATCH_SIZE: u32 = 100;

/// Storage provider settings. Only the fields of the selected backend are required.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local_path: PathBuf,
    pub aws_bucket: Option<String>,
    pub aws_region: Option<String>,
    // Custom endpoint for S3-compatible providers (MinIO etc.)
    pub aws_endpoint: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub azure_account: Option<String>,
    pub azure_access_key: Option<String>,
    pub azure_container: String,
    pub gcp_bucket: Option<String>,
    pub gcp_service_account_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_path: PathBuf::from("./data/storage"),
            aws_bucket: None,
            aws_region: None,
            aws_endpoint: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            azure_account: None,
            azure_access_key: None,
            azure_container: "files".to_string(),
            gcp_bucket: None,
            gcp_service_account_path: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub backend: MetadataBackend,
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Database name for MongoDB; SQL backends take it from the URL.
    pub mongodb_database: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: MetadataBackend::Sqlite,
            url: "sqlite://cabinet.db?mode=rwc".to_string(),
            max_connections: DB_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DB_ACQUIRE_TIMEOUT_SECS),
            mongodb_database: "cabinet".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PurgeConfig {
    pub interval: Duration,
    /// Minimum age of a tombstone before the background worker purges it
    pub grace_period: Duration,
    pub batch_size: u32,
    /// Attempt the blob delete right after tombstoning
    pub inline: bool,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(PURGE_INTERVAL_SECS),
            grace_period: Duration::from_secs(PURGE_GRACE_SECS),
            batch_size: PURGE_BATCH_SIZE,
            inline: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub upload: UploadPolicy,
    pub chunk_size: usize,
    pub storage_retry: RetryPolicy,
    pub store_retry: RetryPolicy,
    pub max_concurrent_requests: usize,
    pub purge: PurgeConfig,
    pub default_tenant_id: String,
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
            attempt_timeout: Duration::from_secs(STORAGE_TIMEOUT_SECS),
        };
        Self {
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
            upload: UploadPolicy::default(),
            chunk_size: CHUNK_SIZE_BYTES,
            storage_retry: retry,
            store_retry: retry.with_timeout(Duration::from_secs(STORE_TIMEOUT_SECS)),
            max_concurrent_requests: MAX_CONCURRENT_REQUESTS,
            purge: PurgeConfig::default(),
            default_tenant_id: "default".to_string(),
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", name, raw, e)),
        None => Ok(default),
    }
}

fn list_var(name: &str) -> Option<Vec<String>> {
    optional_var(name).map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let storage = StorageConfig {
            backend: parse_var("STORAGE_BACKEND", StorageBackend::Local)?,
            local_path: optional_var("LOCAL_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/storage")),
            aws_bucket: optional_var("AWS_S3_BUCKET").or_else(|| optional_var("S3_BUCKET")),
            aws_region: optional_var("AWS_REGION").or_else(|| optional_var("S3_REGION")),
            aws_endpoint: optional_var("AWS_ENDPOINT").or_else(|| optional_var("S3_ENDPOINT")),
            aws_access_key_id: optional_var("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: optional_var("AWS_SECRET_ACCESS_KEY"),
            azure_account: optional_var("AZURE_STORAGE_ACCOUNT"),
            azure_access_key: optional_var("AZURE_STORAGE_ACCESS_KEY"),
            azure_container: optional_var("AZURE_STORAGE_CONTAINER")
                .unwrap_or_else(|| "files".to_string()),
            gcp_bucket: optional_var("GCP_BUCKET"),
            gcp_service_account_path: optional_var("GCP_SERVICE_ACCOUNT_PATH"),
        };

        let database = DatabaseConfig {
            backend: parse_var("METADATA_BACKEND", MetadataBackend::Sqlite)?,
            url: optional_var("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://cabinet.db?mode=rwc".to_string()),
            max_connections: parse_var("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS)?,
            acquire_timeout: Duration::from_secs(parse_var(
                "DB_ACQUIRE_TIMEOUT_SECS",
                DB_ACQUIRE_TIMEOUT_SECS,
            )?),
            mongodb_database: optional_var("MONGODB_DATABASE")
                .unwrap_or_else(|| "cabinet".to_string()),
        };

        let allowed_extensions = list_var("ALLOWED_EXTENSIONS").unwrap_or_else(|| {
            DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect()
        });
        let allowed_content_types = list_var("ALLOWED_CONTENT_TYPES")
            .unwrap_or_else(|| derive_content_types(&allowed_extensions));
        let max_file_size_mb: u64 = parse_var("MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB)?;

        let upload = UploadPolicy {
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            allowed_extensions,
            allowed_content_types,
            max_xml_metadata_bytes: parse_var("MAX_XML_METADATA_BYTES", MAX_XML_METADATA_BYTES)?,
            max_tags: parse_var("MAX_TAGS", MAX_TAGS)?,
        };

        let base_retry = RetryPolicy {
            max_attempts: parse_var("RETRY_MAX_ATTEMPTS", RETRY_MAX_ATTEMPTS)?,
            base_delay: Duration::from_millis(parse_var(
                "RETRY_BASE_DELAY_MS",
                RETRY_BASE_DELAY_MS,
            )?),
            max_delay: Duration::from_millis(parse_var("RETRY_MAX_DELAY_MS", RETRY_MAX_DELAY_MS)?),
            attempt_timeout: Duration::from_secs(STORAGE_TIMEOUT_SECS),
        };
        let storage_retry = base_retry.with_timeout(Duration::from_secs(parse_var(
            "STORAGE_TIMEOUT_SECS",
            STORAGE_TIMEOUT_SECS,
        )?));
        let store_retry = base_retry.with_timeout(Duration::from_secs(parse_var(
            "STORE_TIMEOUT_SECS",
            STORE_TIMEOUT_SECS,
        )?));

        let purge = PurgeConfig {
            interval: Duration::from_secs(parse_var("PURGE_INTERVAL_SECS", PURGE_INTERVAL_SECS)?),
            grace_period: Duration::from_secs(parse_var("PURGE_GRACE_SECS", PURGE_GRACE_SECS)?),
            batch_size: parse_var("PURGE_BATCH_SIZE", PURGE_BATCH_SIZE)?,
            inline: parse_var("INLINE_PURGE", true)?,
        };

        let config = Config {
            storage,
            database,
            upload,
            chunk_size: parse_var("CHUNK_SIZE_BYTES", CHUNK_SIZE_BYTES)?,
            storage_retry,
            store_retry,
            max_concurrent_requests: parse_var("MAX_CONCURRENT_REQUESTS", MAX_CONCURRENT_REQUESTS)?,
            purge,
            default_tenant_id: optional_var("DEFAULT_TENANT_ID")
                .unwrap_or_else(|| "default".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.chunk_size == 0 {
            return Err(anyhow::anyhow!("CHUNK_SIZE_BYTES must be greater than zero"));
        }
        if self.upload.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_FILE_SIZE_MB must be greater than zero"));
        }
        if self.upload.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("ALLOWED_EXTENSIONS must not be empty"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(anyhow::anyhow!(
                "MAX_CONCURRENT_REQUESTS must be greater than zero"
            ));
        }
        if self.storage_retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("RETRY_MAX_ATTEMPTS must be at least 1"));
        }

        match self.storage.backend {
            StorageBackend::Local => {}
            StorageBackend::Aws => {
                if self.storage.aws_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "AWS_S3_BUCKET must be set when using the aws storage backend"
                    ));
                }
                if self.storage.aws_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "AWS_REGION must be set when using the aws storage backend"
                    ));
                }
            }
            StorageBackend::Azure => {
                if self.storage.azure_account.is_none() {
                    return Err(anyhow::anyhow!(
                        "AZURE_STORAGE_ACCOUNT must be set when using the azure storage backend"
                    ));
                }
            }
            StorageBackend::Gcp => {
                if self.storage.gcp_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "GCP_BUCKET must be set when using the gcp storage backend"
                    ));
                }
            }
        }

        let url = self.database.url.as_str();
        let scheme_ok = match self.database.backend {
            MetadataBackend::Postgres => {
                url.starts_with("postgres://") || url.starts_with("postgresql://")
            }
            MetadataBackend::MySql => url.starts_with("mysql://"),
            MetadataBackend::Sqlite => url.starts_with("sqlite:"),
            MetadataBackend::MongoDb => {
                url.starts_with("mongodb://") || url.starts_with("mongodb+srv://")
            }
        };
        if !scheme_ok {
            return Err(anyhow::anyhow!(
                "DATABASE_URL does not match METADATA_BACKEND={}",
                self.database.backend
            ));
        }

        Ok(())
    }
}
