use std::path::Path;

use anyhow::{bail, Context};
use cabinet_core::validation::content_types_for_extension;
use cabinet_core::{FileQuery, FileStatus, PageCursor, PageRequest};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use uuid::Uuid;

/// Initialize tracing for the CLI. Logs go to stderr so `fetch` can write to stdout.
///
/// `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

pub fn parse_id(raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("Invalid file id: {}", raw))
}

/// Accepts RFC 3339 timestamps or plain dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid timestamp: {}", raw))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("Invalid timestamp: {}", raw))?;
    Ok(midnight.and_utc())
}

/// Content type implied by the file's extension, if it is a known one.
pub fn guess_content_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_lowercase();
    content_types_for_extension(&extension).first().copied()
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Filters and paging accepted by `cabinet query`.
#[derive(Args, Debug, Default, Clone)]
pub struct QueryArgs {
    /// Case-insensitive filename substring
    #[arg(long)]
    pub name: Option<String>,
    /// Required tag; repeat for several (all must match)
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    /// active, tombstoned or purged
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub content_type: Option<String>,
    #[arg(long)]
    pub min_size: Option<u64>,
    #[arg(long)]
    pub max_size: Option<u64>,
    /// Created at or after (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    pub after: Option<String>,
    /// Created before (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    pub before: Option<String>,
    #[arg(long, default_value = "50")]
    pub limit: u32,
    #[arg(long, default_value = "0")]
    pub offset: u32,
    /// Cursor from a previous page's next_cursor
    #[arg(long)]
    pub cursor: Option<String>,
}

impl QueryArgs {
    pub fn to_query(&self) -> anyhow::Result<(FileQuery, PageRequest)> {
        let status = match self.status.as_deref() {
            Some(raw) => Some(raw.parse::<FileStatus>()?),
            None => None,
        };
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min > max {
                bail!("--min-size must not exceed --max-size");
            }
        }

        let query = FileQuery {
            filename_contains: self.name.clone(),
            tags: self
                .tags
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            status,
            content_type: self.content_type.clone(),
            size_min: self.min_size,
            size_max: self.max_size,
            created_after: self.after.as_deref().map(parse_timestamp).transpose()?,
            created_before: self.before.as_deref().map(parse_timestamp).transpose()?,
        };

        let page = match self.cursor.as_deref() {
            Some(raw) => PageRequest::after(self.limit, PageCursor::decode(raw)?),
            None => PageRequest::new(self.limit, self.offset),
        };
        Ok((query, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_parse_timestamp_forms() {
        let ts = parse_timestamp("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        let day = parse_timestamp("2024-03-01").unwrap();
        assert_eq!(day.day(), 1);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(
            guess_content_type(Path::new("/tmp/Report.PDF")),
            Some("application/pdf")
        );
        assert_eq!(guess_content_type(Path::new("notes")), None);
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2_400_000), "2.3 MiB");
    }

    #[test]
    fn test_query_args_build_filters() {
        let args = QueryArgs {
            name: Some("report".to_string()),
            tags: vec!["Finance".to_string(), " q1 ".to_string()],
            status: Some("tombstoned".to_string()),
            limit: 10,
            ..Default::default()
        };
        let (query, page) = args.to_query().unwrap();
        assert_eq!(query.tags.len(), 2);
        assert!(query.tags.contains("finance"));
        assert_eq!(query.status, Some(FileStatus::Tombstoned));
        assert_eq!(page.limit, 10);
        assert!(page.cursor.is_none());
    }

    #[test]
    fn test_query_args_reject_inverted_size_range() {
        let args = QueryArgs {
            min_size: Some(10),
            max_size: Some(5),
            ..Default::default()
        };
        assert!(args.to_query().is_err());
    }
}
