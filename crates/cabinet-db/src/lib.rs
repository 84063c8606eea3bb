//! Metadata store for file records
//!
//! One contract ([`MetadataStore`]) with a dialect-aware SQL implementation covering
//! PostgreSQL, MySQL and SQLite, and a MongoDB implementation behind the `mongodb`
//! feature. Every tenant-facing operation takes the tenant explicitly and applies it
//! in the backend filter; it is never read from caller-supplied query filters.

pub mod codec;
pub mod error;
pub mod factory;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod resilient;
pub mod sql;
pub mod store;

pub use error::{MetadataError, StoreResult};
pub use factory::create_metadata_store;
#[cfg(feature = "mongodb")]
pub use mongo::MongoMetadataStore;
pub use resilient::ResilientMetadataStore;
pub use sql::{SqlDialect, SqlMetadataStore};
pub use store::MetadataStore;
