//! Cabinet Core Library
//!
//! This crate provides the domain models, error types, configuration, tenant context
//! and upload policy shared by every Cabinet component. It performs no storage or
//! database I/O itself.

pub mod config;
pub mod error;
pub mod models;
pub mod retry;
pub mod storage_types;
pub mod tenant;
pub mod validation;
pub mod xml;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{
    FileInfo, FilePage, FileQuery, FileRecord, FileStatus, FileUpdate, PageCursor, PageRequest,
    XmlMetadata,
};
pub use retry::{retry, RetryPolicy, Retryable};
pub use storage_types::{MetadataBackend, StorageBackend};
pub use tenant::{TenantContext, TenantId};
pub use validation::UploadPolicy;
