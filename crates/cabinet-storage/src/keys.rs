//! Shared key generation for storage backends.
//!
//! Key format: `tenants/{tenant_id}/files/{name}`.

use cabinet_core::TenantId;

use crate::traits::{StorageError, StorageResult};

const TENANT_PREFIX: &str = "tenants";
const FILES_SEGMENT: &str = "files";

/// Generate a storage key for the given tenant and object name.
///
/// `name` must be a single path segment. All backends must use this format.
pub fn generate_storage_key(tenant_id: &TenantId, name: &str) -> StorageResult<String> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
    {
        return Err(StorageError::InvalidKey(format!(
            "Invalid object name: {}",
            name
        )));
    }
    Ok(format!(
        "{}/{}/{}/{}",
        TENANT_PREFIX,
        tenant_id.as_str(),
        FILES_SEGMENT,
        name
    ))
}

/// Reject keys that could escape the storage root.
pub fn validate_key(storage_key: &str) -> StorageResult<()> {
    if storage_key.is_empty()
        || storage_key.contains("..")
        || storage_key.starts_with('/')
        || storage_key.contains('\\')
    {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Tenant segment of a key produced by [`generate_storage_key`].
pub fn tenant_of_key(storage_key: &str) -> Option<&str> {
    let mut parts = storage_key.splitn(4, '/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(TENANT_PREFIX), Some(tenant), Some(FILES_SEGMENT), Some(name)) if !name.is_empty() => {
            Some(tenant)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_embeds_tenant() {
        let tenant = TenantId::parse("t1").unwrap();
        let key = generate_storage_key(&tenant, "abc.pdf").unwrap();
        assert_eq!(key, "tenants/t1/files/abc.pdf");
        assert_eq!(tenant_of_key(&key), Some("t1"));
    }

    #[test]
    fn test_rejects_nested_names() {
        let tenant = TenantId::parse("t1").unwrap();
        assert!(generate_storage_key(&tenant, "../t2/files/x.pdf").is_err());
        assert!(generate_storage_key(&tenant, "a/b.pdf").is_err());
        assert!(generate_storage_key(&tenant, ".hidden").is_err());
        assert!(generate_storage_key(&tenant, "").is_err());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("tenants/t1/files/a.pdf").is_ok());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("tenants/../x").is_err());
        assert_eq!(tenant_of_key("media/t1/a.pdf"), None);
    }
}
