//! Behaviour every storage backend must share.

use std::sync::Arc;

use bytes::Bytes;
use cabinet_core::TenantId;
use cabinet_storage::{
    LocalStorage, ObjectStoreStorage, Storage, StorageBackend, StorageError,
};
use futures::{stream, StreamExt};
use tempfile::TempDir;

async fn backends() -> (TempDir, Vec<Arc<dyn Storage>>) {
    let dir = TempDir::new().unwrap();
    let local = LocalStorage::new(dir.path()).await.unwrap();
    let backends: Vec<Arc<dyn Storage>> = vec![
        Arc::new(local),
        Arc::new(ObjectStoreStorage::in_memory(StorageBackend::Aws).with_part_size(1024)),
        Arc::new(ObjectStoreStorage::in_memory(StorageBackend::Azure).with_part_size(1024)),
        Arc::new(ObjectStoreStorage::in_memory(StorageBackend::Gcp).with_part_size(1024)),
    ];
    (dir, backends)
}

fn chunks(data: &[u8], size: usize) -> cabinet_storage::ByteStream {
    let parts: Vec<_> = data
        .chunks(size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(parts).boxed()
}

async fn read_all(storage: &dyn Storage, key: &str) -> Vec<u8> {
    let mut stream = storage.get(key).await.unwrap();
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

#[tokio::test]
async fn round_trip_is_byte_identical_on_every_backend() {
    let (_dir, backends) = backends().await;
    let tenant = TenantId::parse("t1").unwrap();
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    for storage in backends {
        let key = storage
            .put(
                &tenant,
                "blob.bin",
                "application/octet-stream",
                chunks(&data, 777),
                Some(data.len() as u64),
            )
            .await
            .unwrap();
        assert!(key.starts_with("tenants/t1/"), "{}", storage.backend_type());
        assert_eq!(read_all(storage.as_ref(), &key).await, data);
    }
}

#[tokio::test]
async fn tenants_get_disjoint_keys() {
    let (_dir, backends) = backends().await;
    let t1 = TenantId::parse("t1").unwrap();
    let t2 = TenantId::parse("t2").unwrap();

    for storage in backends {
        let k1 = storage
            .put(&t1, "same.txt", "text/plain", chunks(b"one", 2), None)
            .await
            .unwrap();
        let k2 = storage
            .put(&t2, "same.txt", "text/plain", chunks(b"two", 2), None)
            .await
            .unwrap();
        assert_ne!(k1, k2);
        assert_eq!(read_all(storage.as_ref(), &k1).await, b"one");
        assert_eq!(read_all(storage.as_ref(), &k2).await, b"two");
    }
}

#[tokio::test]
async fn failed_put_leaves_nothing_behind() {
    let (_dir, backends) = backends().await;
    let tenant = TenantId::parse("t1").unwrap();

    for storage in backends {
        let data = stream::iter(vec![
            Ok(Bytes::from(vec![1u8; 2048])),
            Ok(Bytes::from(vec![2u8; 2048])),
            Err(StorageError::Unavailable("connection reset".to_string())),
        ])
        .boxed();
        let err = storage
            .put(&tenant, "broken.bin", "application/octet-stream", data, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert!(!storage
            .exists("tenants/t1/files/broken.bin")
            .await
            .unwrap());
    }
}

#[tokio::test]
async fn delete_and_missing_keys_behave_the_same() {
    let (_dir, backends) = backends().await;
    let tenant = TenantId::parse("t1").unwrap();

    for storage in backends {
        let key = storage
            .put(&tenant, "gone.txt", "text/plain", chunks(b"bye", 8), Some(3))
            .await
            .unwrap();
        storage.delete(&key).await.unwrap();
        storage.delete(&key).await.unwrap();
        assert!(!storage.exists(&key).await.unwrap());
        assert!(matches!(
            storage.get(&key).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
