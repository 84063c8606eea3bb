pub mod file;
pub mod query;

pub use file::{FileInfo, FileRecord, FileStatus, FileUpdate, XmlMetadata};
pub use query::{FilePage, FileQuery, PageCursor, PageRequest};
