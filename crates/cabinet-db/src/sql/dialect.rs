use cabinet_core::MetadataBackend;

/// SQL flavours reachable through the `sqlx::Any` driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    MySql,
    Sqlite,
}

impl SqlDialect {
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(SqlDialect::Postgres)
        } else if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            Some(SqlDialect::MySql)
        } else if url.starts_with("sqlite:") {
            Some(SqlDialect::Sqlite)
        } else {
            None
        }
    }

    pub fn backend(&self) -> MetadataBackend {
        match self {
            SqlDialect::Postgres => MetadataBackend::Postgres,
            SqlDialect::MySql => MetadataBackend::MySql,
            SqlDialect::Sqlite => MetadataBackend::Sqlite,
        }
    }

    /// Bind placeholder for the n-th (1-based) parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            SqlDialect::MySql => "?".to_string(),
            SqlDialect::Postgres | SqlDialect::Sqlite => format!("${}", n),
        }
    }

    /// Idempotent DDL statements, run in order at startup.
    pub fn schema(&self) -> &'static [&'static str] {
        match self {
            SqlDialect::MySql => MYSQL_SCHEMA,
            SqlDialect::Postgres | SqlDialect::Sqlite => PORTABLE_SCHEMA,
        }
    }
}

const PORTABLE_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS files (
        id VARCHAR(36) PRIMARY KEY,
        tenant_id VARCHAR(64) NOT NULL,
        filename VARCHAR(255) NOT NULL,
        filename_lower VARCHAR(255) NOT NULL,
        content_type VARCHAR(255) NOT NULL,
        size_bytes BIGINT NOT NULL,
        checksum_sha256 VARCHAR(64) NOT NULL,
        storage_key VARCHAR(512) NOT NULL,
        storage_provider VARCHAR(16) NOT NULL,
        metadata_xml TEXT,
        metadata_json TEXT,
        tags TEXT NOT NULL,
        status VARCHAR(16) NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_files_tenant_status_created ON files (tenant_id, status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_files_status_updated ON files (status, updated_at)",
    r#"CREATE TABLE IF NOT EXISTS file_tags (
        file_id VARCHAR(36) NOT NULL,
        tenant_id VARCHAR(64) NOT NULL,
        tag VARCHAR(64) NOT NULL,
        PRIMARY KEY (file_id, tag)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_file_tags_tenant_tag ON file_tags (tenant_id, tag)",
];

// MySQL has no CREATE INDEX IF NOT EXISTS; indexes are declared inline
const MYSQL_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS files (
        id VARCHAR(36) PRIMARY KEY,
        tenant_id VARCHAR(64) NOT NULL,
        filename VARCHAR(255) NOT NULL,
        filename_lower VARCHAR(255) NOT NULL,
        content_type VARCHAR(255) NOT NULL,
        size_bytes BIGINT NOT NULL,
        checksum_sha256 VARCHAR(64) NOT NULL,
        storage_key VARCHAR(512) NOT NULL,
        storage_provider VARCHAR(16) NOT NULL,
        metadata_xml MEDIUMTEXT,
        metadata_json MEDIUMTEXT,
        tags TEXT NOT NULL,
        status VARCHAR(16) NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL,
        INDEX idx_files_tenant_status_created (tenant_id, status, created_at),
        INDEX idx_files_status_updated (status, updated_at)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS file_tags (
        file_id VARCHAR(36) NOT NULL,
        tenant_id VARCHAR(64) NOT NULL,
        tag VARCHAR(64) NOT NULL,
        PRIMARY KEY (file_id, tag),
        INDEX idx_file_tags_tenant_tag (tenant_id, tag)
    )"#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(
            SqlDialect::from_url("postgresql://localhost/db"),
            Some(SqlDialect::Postgres)
        );
        assert_eq!(SqlDialect::from_url("mysql://root@db/x"), Some(SqlDialect::MySql));
        assert_eq!(SqlDialect::from_url("sqlite::memory:"), Some(SqlDialect::Sqlite));
        assert_eq!(SqlDialect::from_url("mongodb://x"), None);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(SqlDialect::Postgres.placeholder(3), "$3");
        assert_eq!(SqlDialect::Sqlite.placeholder(1), "$1");
        assert_eq!(SqlDialect::MySql.placeholder(7), "?");
    }
}
