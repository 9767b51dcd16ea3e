//! Error types for the access control engine.

use crate::types::PermissionKey;
use thiserror::Error;

/// Errors from the access control engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A domain in the checked context does not imply the required permission.
    #[error("access denied {permission}")]
    AccessDenied { permission: PermissionKey },

    /// Attempt to mutate a sealed permission collection.
    #[error("attempt to add a permission to a read-only {collection}")]
    ReadOnly { collection: &'static str },

    /// A homogeneous collection was handed a permission of another kind.
    #[error("invalid permission for {collection}: expected kind '{expected}', found '{found}'")]
    KindMismatch {
        collection: &'static str,
        expected: String,
        found: String,
    },

    /// A permission could not be constructed from its name and actions.
    #[error("invalid permission: {0}")]
    InvalidPermission(String),

    /// A code source location could not be parsed.
    #[error("invalid code source location '{location}': {reason}")]
    InvalidLocation { location: String, reason: String },

    /// Policy backend error.
    #[error("policy error: {0}")]
    Policy(String),
}

impl EngineError {
    /// The permission that was denied, if this is an authorization failure.
    pub fn denied_permission(&self) -> Option<&PermissionKey> {
        match self {
            EngineError::AccessDenied { permission } => Some(permission),
            _ => None,
        }
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, EngineError::AccessDenied { .. })
    }
}
