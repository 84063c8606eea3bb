use std::collections::BTreeSet;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::file::FileStatus;

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// Caller-supplied filters. The tenant is never part of this struct; it is
/// injected by the registry from the request context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileQuery {
    /// Case-insensitive substring match on the filename
    pub filename_contains: Option<String>,
    /// Every tag listed must be present on the record
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Defaults to `Active` when unset
    pub status: Option<FileStatus>,
    pub content_type: Option<String>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl FileQuery {
    pub fn effective_status(&self) -> FileStatus {
        self.status.unwrap_or(FileStatus::Active)
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_filename(mut self, needle: impl Into<String>) -> Self {
        self.filename_contains = Some(needle.into());
        self
    }

    pub fn with_status(mut self, status: FileStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Keyset position after the last record of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at_micros: i64,
    pub id: Uuid,
}

impl PageCursor {
    pub fn new(created_at: DateTime<Utc>, id: Uuid) -> Self {
        Self {
            created_at_micros: created_at.timestamp_micros(),
            id,
        }
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.created_at_micros, self.id))
    }

    pub fn decode(value: &str) -> Result<Self, AppError> {
        let invalid = || AppError::Validation("Invalid page cursor".to_string());
        let bytes = URL_SAFE_NO_PAD.decode(value).map_err(|_| invalid())?;
        let text = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (micros, id) = text.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            created_at_micros: micros.parse().map_err(|_| invalid())?,
            id: Uuid::parse_str(id).map_err(|_| invalid())?,
        })
    }
}

/// Pagination. When `cursor` is set, `offset` is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub offset: u32,
    pub cursor: Option<PageCursor>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
            cursor: None,
        }
    }
}

impl PageRequest {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit,
            offset,
            cursor: None,
        }
    }

    pub fn after(limit: u32, cursor: PageCursor) -> Self {
        Self {
            limit,
            offset: 0,
            cursor: Some(cursor),
        }
    }

    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn effective_offset(&self) -> u32 {
        if self.cursor.is_some() {
            0
        } else {
            self.offset
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePage<T> {
    pub items: Vec<T>,
    /// Matching records ignoring pagination
    pub total: u64,
    pub next_cursor: Option<String>,
}

impl<T> FilePage<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> FilePage<U> {
        FilePage {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            next_cursor: self.next_cursor,
        }
    }
}
