use std::sync::Arc;

use cabinet_core::{Config, MetadataBackend};

#[cfg(feature = "mongodb")]
use crate::MongoMetadataStore;
use crate::{MetadataError, MetadataStore, ResilientMetadataStore, SqlMetadataStore, StoreResult};

/// Connect the configured metadata backend and wrap it with the store retry policy.
pub async fn create_metadata_store(config: &Config) -> StoreResult<Arc<dyn MetadataStore>> {
    let settings = &config.database;

    let store: Arc<dyn MetadataStore> = match settings.backend {
        MetadataBackend::Postgres | MetadataBackend::MySql | MetadataBackend::Sqlite => {
            let store = SqlMetadataStore::connect(
                &settings.url,
                settings.max_connections,
                settings.acquire_timeout,
            )
            .await?;
            if store.backend_type() != settings.backend {
                return Err(MetadataError::Database(format!(
                    "DATABASE_URL does not match METADATA_BACKEND={}",
                    settings.backend
                )));
            }
            Arc::new(store)
        }

        #[cfg(feature = "mongodb")]
        MetadataBackend::MongoDb => Arc::new(
            MongoMetadataStore::connect(&settings.url, &settings.mongodb_database).await?,
        ),

        #[cfg(not(feature = "mongodb"))]
        MetadataBackend::MongoDb => {
            return Err(MetadataError::Database(
                "MongoDB backend not available (mongodb feature not enabled)".to_string(),
            ))
        }
    };

    tracing::info!(backend = %settings.backend, "Metadata store initialized");
    Ok(Arc::new(ResilientMetadataStore::new(
        store,
        config.store_retry,
    )))
}
