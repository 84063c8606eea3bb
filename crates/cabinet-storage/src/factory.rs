use std::sync::Arc;

use cabinet_core::Config;

#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[allow(unused_imports)]
use crate::ObjectStoreStorage;
use crate::{Storage, StorageBackend, StorageError, StorageResult};

fn required<'a>(value: &'a Option<String>, name: &str) -> StorageResult<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| StorageError::ConfigError(format!("{} not configured", name)))
}

/// Create a storage backend based on configuration
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    let settings = &config.storage;

    match settings.backend {
        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let storage = LocalStorage::new(settings.local_path.clone()).await?;
            tracing::info!(path = %settings.local_path.display(), "Local storage initialized");
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-aws")]
        StorageBackend::Aws => {
            let bucket = required(&settings.aws_bucket, "AWS_S3_BUCKET")?;
            let region = required(&settings.aws_region, "AWS_REGION")?;
            let credentials = settings
                .aws_access_key_id
                .as_deref()
                .zip(settings.aws_secret_access_key.as_deref());
            let storage = ObjectStoreStorage::aws(
                bucket,
                region,
                settings.aws_endpoint.as_deref(),
                credentials,
                &config.storage_retry,
            )?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-aws"))]
        StorageBackend::Aws => Err(StorageError::ConfigError(
            "AWS storage backend not available (storage-aws feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-azure")]
        StorageBackend::Azure => {
            let account = required(&settings.azure_account, "AZURE_STORAGE_ACCOUNT")?;
            let storage = ObjectStoreStorage::azure(
                account,
                settings.azure_access_key.as_deref(),
                &settings.azure_container,
                &config.storage_retry,
            )?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-azure"))]
        StorageBackend::Azure => Err(StorageError::ConfigError(
            "Azure storage backend not available (storage-azure feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-gcp")]
        StorageBackend::Gcp => {
            let bucket = required(&settings.gcp_bucket, "GCP_BUCKET")?;
            let storage = ObjectStoreStorage::gcp(
                bucket,
                settings.gcp_service_account_path.as_deref(),
                &config.storage_retry,
            )?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-gcp"))]
        StorageBackend::Gcp => Err(StorageError::ConfigError(
            "GCP storage backend not available (storage-gcp feature not enabled)".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "storage-local")]
    #[tokio::test]
    async fn test_creates_local_storage() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.local_path = dir.path().join("blobs");
        let storage = create_storage(&config).await.unwrap();
        assert_eq!(storage.backend_type(), StorageBackend::Local);
        assert!(dir.path().join("blobs").exists());
    }

    #[cfg(feature = "storage-aws")]
    #[tokio::test]
    async fn test_aws_requires_bucket() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Aws;
        assert!(matches!(
            create_storage(&config).await,
            Err(StorageError::ConfigError(_))
        ));
    }
}
