//! Cabinet services
//!
//! The [`ContentRegistry`] orchestrates uploads, fetches, queries, metadata
//! updates and deletes. It drives the [`ChunkedTransferEngine`] against a storage
//! backend and keeps file records in a metadata store. [`PurgeService`] reclaims
//! blobs of deleted files in the background.

pub mod bootstrap;
pub mod purge;
pub mod registry;
pub mod transfer;

pub use bootstrap::{build_registry, build_shared_registry};
pub use purge::{purge_record, PurgeReport, PurgeService};
pub use registry::{ContentRegistry, MetadataChanges, UploadRequest};
pub use transfer::{ChunkedTransferEngine, FileStream, InboundStream, TransferOutcome};
