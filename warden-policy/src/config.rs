//! TOML configuration parsing for the grant policy.

use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from policy configuration parsing.
#[derive(Error, Debug)]
pub enum PolicyConfigError {
    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse policy TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid code base '{code_base}': {reason}")]
    InvalidLocation { code_base: String, reason: String },
    #[error("invalid grant: {0}")]
    InvalidGrant(String),
}

/// Top-level policy configuration.
///
/// ```toml
/// [certificates]
/// vendor = { subject = "CN=Vendor" }
///
/// [[grants]]
/// code_base = "file:/opt/app/-"
/// signed_by = ["vendor"]
/// permissions = [
///     { kind = "RuntimePermission", name = "exitVM" },
///     { kind = "PropertyPermission", name = "user.*", actions = "read" },
/// ]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// Grant entries, applied in file order.
    #[serde(default)]
    pub grants: Vec<GrantConfig>,

    /// Signer certificates, keyed by the alias grants refer to them by.
    #[serde(default)]
    pub certificates: HashMap<String, CertificateConfig>,
}

/// A single grant entry.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantConfig {
    /// Code location the grant applies to. Absent means any location.
    #[serde(default)]
    pub code_base: Option<String>,

    /// Certificate aliases that must all have signed the code.
    #[serde(default)]
    pub signed_by: Vec<String>,

    /// Principals the code must run as. Class and name support glob
    /// patterns (e.g., `name = "ops-*"`).
    #[serde(default)]
    pub principals: Vec<PrincipalConfig>,

    /// The permissions granted.
    #[serde(default)]
    pub permissions: Vec<PermissionConfig>,
}

/// A principal pattern.
#[derive(Debug, Clone, Deserialize)]
pub struct PrincipalConfig {
    pub class: String,
    pub name: String,
}

/// A granted permission.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionConfig {
    /// Permission kind (e.g., "RuntimePermission", "PropertyPermission").
    pub kind: String,
    /// Target name.
    pub name: String,
    /// Actions, for kinds that take them.
    #[serde(default)]
    pub actions: Option<String>,
    /// Certificate aliases the permission kind itself must be signed by.
    #[serde(default)]
    pub signed_by: Vec<String>,
}

/// A signer certificate.
#[derive(Debug, Clone, Deserialize)]
pub struct CertificateConfig {
    /// Subject distinguished name.
    pub subject: String,
    /// Encoded form. Defaults to the subject bytes.
    #[serde(default)]
    pub encoded: Option<String>,
}

impl PolicyConfig {
    /// Load policy from a TOML file path.
    pub fn from_file(path: &std::path::Path) -> Result<Self, PolicyConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse policy from a TOML string.
    pub fn parse(content: &str) -> Result<Self, PolicyConfigError> {
        let config: PolicyConfig = toml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_grant() {
        let config = PolicyConfig::parse(
            r#"
[certificates]
vendor = { subject = "CN=Vendor", encoded = "3082" }

[[grants]]
code_base = "file:/opt/app/-"
signed_by = ["vendor"]
principals = [{ class = "UserPrincipal", name = "ops-*" }]
permissions = [
    { kind = "RuntimePermission", name = "exitVM" },
    { kind = "PropertyPermission", name = "user.*", actions = "read" },
]
"#,
        )
        .unwrap();

        assert_eq!(config.grants.len(), 1);
        let grant = &config.grants[0];
        assert_eq!(grant.code_base.as_deref(), Some("file:/opt/app/-"));
        assert_eq!(grant.signed_by, vec!["vendor"]);
        assert_eq!(grant.principals[0].name, "ops-*");
        assert_eq!(grant.permissions[1].actions.as_deref(), Some("read"));
        assert_eq!(config.certificates["vendor"].subject, "CN=Vendor");
    }

    #[test]
    fn test_parse_empty() {
        let config = PolicyConfig::parse("").unwrap();
        assert!(config.grants.is_empty());
        assert!(config.certificates.is_empty());
    }

    #[test]
    fn test_parse_error() {
        let err = PolicyConfig::parse("[[grants]]\npermissions = [{ name = 1 }]").unwrap_err();
        assert!(matches!(err, PolicyConfigError::Parse(_)));
    }
}
