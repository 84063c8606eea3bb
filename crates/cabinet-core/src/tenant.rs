//! Tenant identity carried through every operation.
//!
//! The tenant is always supplied by the caller's authenticated context and never
//! inferred from file content. Identifiers are restricted to a conservative charset
//! because they are embedded verbatim in storage keys.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

const MAX_TENANT_ID_LENGTH: usize = 64;

/// Validated tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(value: impl Into<String>) -> Result<Self, AppError> {
        let value = value.into();
        if value.is_empty() {
            return Err(AppError::Validation(
                "Tenant identifier must not be empty".to_string(),
            ));
        }
        if value.len() > MAX_TENANT_ID_LENGTH {
            return Err(AppError::Validation(format!(
                "Tenant identifier exceeds {} characters",
                MAX_TENANT_ID_LENGTH
            )));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::Validation(
                "Tenant identifier may only contain ASCII letters, digits, '-' and '_'"
                    .to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TenantId::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl Display for TenantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

/// Per-request context handed in by the auth layer.
///
/// Each request owns its context; nothing in it is shared between requests.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    /// Authenticated principal, used for logging only.
    pub principal: Option<String>,
    pub request_id: Uuid,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            principal: None,
            request_id: Uuid::new_v4(),
        }
    }

    /// Resolve a context from a raw tenant string supplied by the auth layer.
    pub fn from_raw(tenant_id: &str) -> Result<Self, AppError> {
        Ok(Self::new(TenantId::parse(tenant_id)?))
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_simple_identifiers() {
        assert_eq!(TenantId::parse("t1").unwrap().as_str(), "t1");
        assert!(TenantId::parse("acme-corp_02").is_ok());
    }

    #[test]
    fn test_rejects_path_like_identifiers() {
        assert!(TenantId::parse("").is_err());
        assert!(TenantId::parse("../t2").is_err());
        assert!(TenantId::parse("t1/t2").is_err());
        assert!(TenantId::parse("a".repeat(65)).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<TenantId, _> = serde_json::from_str("\"t1\"");
        assert!(ok.is_ok());
        let bad: Result<TenantId, _> = serde_json::from_str("\"t 1\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_context_carries_principal() {
        let ctx = TenantContext::from_raw("t1").unwrap().with_principal("alice");
        assert_eq!(ctx.tenant_id().as_str(), "t1");
        assert_eq!(ctx.principal.as_deref(), Some("alice"));
    }
}
