//! Upload policy: filename, type, size, tag and XML metadata checks.
//!
//! Everything here runs before the first byte reaches a storage provider.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::AppError;
use crate::models::XmlMetadata;
use crate::xml;

const MAX_FILENAME_LENGTH: usize = 255;
const MAX_TAG_LENGTH: usize = 64;

pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "txt", "xml", "json", "csv", "xlsx", "png", "jpg", "jpeg", "gif",
];

/// Expected MIME types for known extensions. Unknown extensions skip the cross-check.
pub fn content_types_for_extension(extension: &str) -> &'static [&'static str] {
    match extension {
        "jpg" | "jpeg" => &["image/jpeg"],
        "png" => &["image/png"],
        "gif" => &["image/gif"],
        "webp" => &["image/webp"],
        "svg" => &["image/svg+xml"],
        "pdf" => &["application/pdf"],
        "doc" => &["application/msword"],
        "docx" => &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
        "xls" => &["application/vnd.ms-excel"],
        "xlsx" => &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
        "txt" => &["text/plain"],
        "csv" => &["text/csv", "application/csv"],
        "json" => &["application/json"],
        "xml" => &["application/xml", "text/xml"],
        "zip" => &["application/zip"],
        _ => &[],
    }
}

/// Strip parameters and lowercase (e.g. "Text/Plain; charset=utf-8" -> "text/plain").
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .map(|s| s.trim())
        .unwrap_or(content_type)
        .to_lowercase()
}

/// Lowercased extension of a filename, without the dot.
pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .filter(|e| !e.is_empty())
}

/// Reduce a caller-supplied filename to its last path component and replace
/// anything outside `[A-Za-z0-9._-]`. Path traversal is rejected outright.
pub fn sanitize_filename(filename: &str) -> Result<String, AppError> {
    let filename_only = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();

    if filename_only.contains("..") {
        return Err(AppError::Validation(
            "Filename contains invalid path traversal".to_string(),
        ));
    }

    let sanitized: String = filename_only
        .chars()
        .take(MAX_FILENAME_LENGTH)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim_matches(|c| c == '.' || c == '_').is_empty() {
        return Err(AppError::Validation("Filename is empty".to_string()));
    }

    Ok(sanitized)
}

/// Normalize a tag set: trim, lowercase, drop duplicates, enforce charset and count.
pub fn normalize_tags<I, S>(tags: I, max_tags: usize) -> Result<BTreeSet<String>, AppError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized = BTreeSet::new();
    for tag in tags {
        let tag = tag.as_ref().trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().count() > MAX_TAG_LENGTH {
            return Err(AppError::Validation(format!(
                "Tag exceeds {} characters",
                MAX_TAG_LENGTH
            )));
        }
        if !tag
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '.' | ':' | '-'))
        {
            return Err(AppError::Validation(format!(
                "Tag '{}' contains invalid characters",
                tag
            )));
        }
        normalized.insert(tag);
    }
    if normalized.len() > max_tags {
        return Err(AppError::Validation(format!(
            "At most {} tags are allowed",
            max_tags
        )));
    }
    Ok(normalized)
}

/// Split a comma-separated tag list as accepted on the command line.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Upload policy limits, built once from [`crate::Config`].
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub allowed_content_types: Vec<String>,
    pub max_xml_metadata_bytes: usize,
    pub max_tags: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        let allowed_extensions: Vec<String> = DEFAULT_ALLOWED_EXTENSIONS
            .iter()
            .map(|e| e.to_string())
            .collect();
        let allowed_content_types = derive_content_types(&allowed_extensions);
        Self {
            max_file_size_bytes: 100 * 1024 * 1024,
            allowed_extensions,
            allowed_content_types,
            max_xml_metadata_bytes: 1024 * 1024,
            max_tags: 32,
        }
    }
}

/// Content types accepted for a list of extensions.
pub fn derive_content_types(extensions: &[String]) -> Vec<String> {
    let mut types: Vec<String> = extensions
        .iter()
        .flat_map(|e| content_types_for_extension(e).iter().map(|t| t.to_string()))
        .collect();
    types.sort();
    types.dedup();
    types
}

/// Result of validating an upload request.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedUpload {
    pub filename: String,
    pub extension: String,
    pub content_type: String,
    pub tags: BTreeSet<String>,
    pub metadata_xml: Option<XmlMetadata>,
}

impl UploadPolicy {
    pub fn validate_filename(&self, filename: &str) -> Result<(String, String), AppError> {
        let sanitized = sanitize_filename(filename)?;
        let extension = file_extension(&sanitized)
            .ok_or_else(|| AppError::Validation("File must have an extension".to_string()))?;
        if !self.allowed_extensions.contains(&extension) {
            return Err(AppError::Validation(format!(
                "Invalid file extension. Allowed extensions: {}",
                self.allowed_extensions.join(", ")
            )));
        }
        Ok((sanitized, extension))
    }

    pub fn validate_content_type(
        &self,
        extension: &str,
        content_type: &str,
    ) -> Result<String, AppError> {
        let normalized = normalize_content_type(content_type);
        if !self.allowed_content_types.iter().any(|ct| *ct == normalized) {
            return Err(AppError::Validation(format!(
                "Invalid content type. Allowed types: {}",
                self.allowed_content_types.join(", ")
            )));
        }

        let expected = content_types_for_extension(extension);
        if !expected.is_empty() && !expected.contains(&normalized.as_str()) {
            return Err(AppError::Validation(format!(
                "Content-Type '{}' does not match extension '{}'. Expected one of: {}",
                normalized,
                extension,
                expected.join(", ")
            )));
        }
        Ok(normalized)
    }

    /// Reject a declared size above the limit before any bytes are read.
    pub fn validate_declared_size(&self, declared: Option<u64>) -> Result<(), AppError> {
        match declared {
            Some(size) if size > self.max_file_size_bytes => Err(AppError::SizeLimitExceeded {
                limit: self.max_file_size_bytes,
            }),
            _ => Ok(()),
        }
    }

    pub fn validate_xml(&self, raw: &str) -> Result<XmlMetadata, AppError> {
        if raw.len() > self.max_xml_metadata_bytes {
            return Err(AppError::Validation(format!(
                "XML metadata exceeds {} bytes",
                self.max_xml_metadata_bytes
            )));
        }
        let parsed = xml::parse_to_json(raw)?;
        Ok(XmlMetadata {
            raw: raw.to_string(),
            parsed,
        })
    }

    pub fn validate_tags<I, S>(&self, tags: I) -> Result<BTreeSet<String>, AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        normalize_tags(tags, self.max_tags)
    }

    /// Validate every caller-supplied field of an upload.
    pub fn validate_upload<S: AsRef<str>>(
        &self,
        filename: &str,
        content_type: &str,
        declared_size: Option<u64>,
        metadata_xml: Option<&str>,
        tags: &[S],
    ) -> Result<ValidatedUpload, AppError> {
        let (filename, extension) = self.validate_filename(filename)?;
        let content_type = self.validate_content_type(&extension, content_type)?;
        self.validate_declared_size(declared_size)?;
        let metadata_xml = metadata_xml.map(|raw| self.validate_xml(raw)).transpose()?;
        let tags = self.validate_tags(tags)?;
        Ok(ValidatedUpload {
            filename,
            extension,
            content_type,
            tags,
            metadata_xml,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("/etc/passwd.txt").unwrap(), "passwd.txt");
        assert_eq!(sanitize_filename("C:\\docs\\q1 report.pdf").unwrap(), "q1_report.pdf");
        assert!(sanitize_filename("../secret.pdf").is_err());
        assert!(sanitize_filename("...").is_err());
    }

    #[test]
    fn test_extension_allow_list() {
        let policy = UploadPolicy::default();
        let (name, ext) = policy.validate_filename("Report.PDF").unwrap();
        assert_eq!(name, "Report.PDF");
        assert_eq!(ext, "pdf");
        assert!(policy.validate_filename("run.exe").is_err());
        assert!(policy.validate_filename("noext").is_err());
    }

    #[test]
    fn test_content_type_must_match_extension() {
        let policy = UploadPolicy::default();
        assert_eq!(
            policy
                .validate_content_type("pdf", "application/PDF; charset=binary")
                .unwrap(),
            "application/pdf"
        );
        assert!(policy.validate_content_type("pdf", "image/png").is_err());
        assert!(policy
            .validate_content_type("pdf", "application/x-msdownload")
            .is_err());
    }

    #[test]
    fn test_declared_size_over_limit() {
        let policy = UploadPolicy {
            max_file_size_bytes: 10,
            ..UploadPolicy::default()
        };
        assert!(policy.validate_declared_size(Some(10)).is_ok());
        assert!(matches!(
            policy.validate_declared_size(Some(11)),
            Err(AppError::SizeLimitExceeded { limit: 10 })
        ));
        assert!(policy.validate_declared_size(None).is_ok());
    }

    #[test]
    fn test_tags_normalized() {
        let tags = normalize_tags(["Finance", " finance ", "", "q1:2024"], 5).unwrap();
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["finance".to_string(), "q1:2024".to_string()]
        );
        assert!(normalize_tags(["a/b"], 5).is_err());
        assert!(normalize_tags(["a", "b", "c"], 2).is_err());
    }

    #[test]
    fn test_split_tags() {
        assert_eq!(split_tags("a, b,,c "), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_validate_upload_rejects_bad_xml() {
        let policy = UploadPolicy::default();
        let tags: [&str; 0] = [];
        let err = policy
            .validate_upload("a.pdf", "application/pdf", None, Some("<open>"), &tags)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
