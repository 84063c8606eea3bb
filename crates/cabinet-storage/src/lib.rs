//! Cabinet Storage Library
//!
//! This crate provides the storage provider contract and its implementations: local
//! filesystem plus the AWS, Azure and GCP object stores.
//!
//! # Storage key format
//!
//! Storage keys are tenant-partitioned and identical across backends:
//! `tenants/{tenant_id}/files/{name}`. Keys must not contain `..` or a leading `/`.
//! Key generation is centralized in the `keys` module so all backends stay consistent.
//!
//! # Atomicity
//!
//! Writes go through a [`PutSession`]. Nothing is visible to `get`/`exists` until
//! [`PutSession::commit`] succeeds: the local backend renames a temporary file into
//! place and object stores complete a multipart upload.

pub mod cloud;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod traits;

// Re-export commonly used types
pub use cabinet_core::StorageBackend;
pub use cloud::ObjectStoreStorage;
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use traits::{ByteStream, PutSession, Storage, StorageError, StorageResult};
