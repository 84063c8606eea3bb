//! Column encodings shared by the SQL and document backends.
//!
//! Timestamps are stored as microseconds since the epoch, tags as a JSON array and
//! parsed XML metadata as JSON text, so every backend round-trips the same values.

use std::collections::BTreeSet;

use cabinet_core::{FileStatus, StorageBackend, TenantId, XmlMetadata};
use chrono::{DateTime, Utc};

use crate::error::{MetadataError, StoreResult};

pub fn to_micros(value: DateTime<Utc>) -> i64 {
    value.timestamp_micros()
}

pub fn from_micros(value: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| MetadataError::Corrupt(format!("timestamp out of range: {}", value)))
}

pub fn encode_tags(tags: &BTreeSet<String>) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

pub fn decode_tags(raw: &str) -> StoreResult<BTreeSet<String>> {
    serde_json::from_str(raw).map_err(|e| MetadataError::Corrupt(format!("tags: {}", e)))
}

/// Split XML metadata into (raw document, parsed JSON text) columns.
pub fn encode_metadata(metadata: Option<&XmlMetadata>) -> (Option<String>, Option<String>) {
    match metadata {
        Some(m) => (Some(m.raw.clone()), Some(m.parsed.to_string())),
        None => (None, None),
    }
}

pub fn decode_metadata(
    raw: Option<String>,
    parsed: Option<String>,
) -> StoreResult<Option<XmlMetadata>> {
    match (raw, parsed) {
        (Some(raw), Some(parsed)) => {
            let parsed = serde_json::from_str(&parsed)
                .map_err(|e| MetadataError::Corrupt(format!("metadata_json: {}", e)))?;
            Ok(Some(XmlMetadata { raw, parsed }))
        }
        _ => Ok(None),
    }
}

pub fn decode_status(raw: &str) -> StoreResult<FileStatus> {
    raw.parse::<FileStatus>()
        .map_err(|e| MetadataError::Corrupt(e.to_string()))
}

pub fn decode_provider(raw: &str) -> StoreResult<StorageBackend> {
    raw.parse::<StorageBackend>()
        .map_err(|e| MetadataError::Corrupt(e.to_string()))
}

pub fn decode_tenant(raw: String) -> StoreResult<TenantId> {
    TenantId::parse(raw).map_err(|e| MetadataError::Corrupt(e.to_string()))
}

pub fn decode_size(raw: i64) -> StoreResult<u64> {
    u64::try_from(raw).map_err(|_| MetadataError::Corrupt(format!("negative size: {}", raw)))
}

/// Size filter bound as a signed column value. Bounds past `i64::MAX` clamp.
pub fn size_bound(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Query tags folded to their stored form, so duplicates differing only in case collapse.
pub fn query_tags(tags: &BTreeSet<String>) -> BTreeSet<String> {
    tags.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Lowercased needle with LIKE wildcards escaped using `!`.
pub fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '!') {
            escaped.push('!');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_bound_clamps() {
        assert_eq!(size_bound(1024), 1024);
        assert_eq!(size_bound(u64::MAX), i64::MAX);
    }

    #[test]
    fn test_query_tags_fold_case() {
        let tags: BTreeSet<String> = ["Finance", "finance", " Q1 ", ""]
            .into_iter()
            .map(String::from)
            .collect();
        let folded = query_tags(&tags);
        assert_eq!(folded.len(), 2);
        assert!(folded.contains("finance") && folded.contains("q1"));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("Q1_50%"), "%q1!_50!%%");
        assert_eq!(like_pattern("a!b"), "%a!!b%");
    }

    #[test]
    fn test_micros_round_trip() {
        let now = Utc::now();
        let back = from_micros(to_micros(now)).unwrap();
        assert_eq!(back.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_tags_round_trip() {
        let tags = BTreeSet::from(["b".to_string(), "a".to_string()]);
        let encoded = encode_tags(&tags);
        assert_eq!(encoded, r#"["a","b"]"#);
        assert_eq!(decode_tags(&encoded).unwrap(), tags);
    }

    #[test]
    fn test_metadata_requires_both_columns() {
        assert_eq!(decode_metadata(Some("<a/>".into()), None).unwrap(), None);
        let decoded = decode_metadata(Some("<a/>".into()), Some(r#"{"a":null}"#.into()))
            .unwrap()
            .unwrap();
        assert_eq!(decoded.parsed, serde_json::json!({"a": null}));
    }
}
