use std::sync::Arc;

use cabinet_core::{AppError, Config};
use cabinet_db::create_metadata_store;
use cabinet_storage::create_storage;

use crate::registry::ContentRegistry;

/// Connect the configured storage and metadata backends and build the registry.
pub async fn build_registry(config: &Config) -> Result<ContentRegistry, AppError> {
    let storage = create_storage(config).await?;
    let store = create_metadata_store(config).await?;

    tracing::info!(
        storage_backend = %storage.backend_type(),
        metadata_backend = %store.backend_type(),
        chunk_size = config.chunk_size,
        max_file_size_bytes = config.upload.max_file_size_bytes,
        "Content registry ready"
    );

    Ok(ContentRegistry::new(config, storage, store))
}

/// Shared handle for callers that serve many requests.
pub async fn build_shared_registry(config: &Config) -> Result<Arc<ContentRegistry>, AppError> {
    build_registry(config).await.map(Arc::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_builds_local_sqlite_registry() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.local_path = dir.path().to_path_buf();
        config.database.url = "sqlite::memory:".to_string();
        config.database.max_connections = 1;

        let registry = build_registry(&config).await.unwrap();
        assert_eq!(
            registry.storage().backend_type(),
            cabinet_core::StorageBackend::Local
        );
        registry.shutdown().await;
    }
}
