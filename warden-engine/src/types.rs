//! Core value types shared by the access control engine.
//!
//! Provides certificates and principals, the identity tuple used to compare
//! permissions, and the `Policy` trait for pluggable grant authorities.

use std::fmt;

use crate::domain::{CodeSource, ProtectionDomain};
use crate::error::EngineError;
use crate::permission::{Permission, PermissionCollection, Permissions};

/// An opaque signer certificate.
///
/// The engine never parses certificates; it only compares them. Two
/// certificates are the same signer when both subject and encoding match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Certificate {
    subject: String,
    encoded: Vec<u8>,
}

impl Certificate {
    pub fn new(subject: impl Into<String>, encoded: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            encoded: encoded.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subject)
    }
}

/// A principal a protection domain acts on behalf of.
///
/// Principals are a `(class, name)` pair: `UserPrincipal "alice"`,
/// `GroupPrincipal "ops"`. The engine does not interpret the class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    class: String,
    name: String,
}

impl Principal {
    pub fn new(class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.class, self.name)
    }
}

/// The identity of a permission: its kind, name and canonical actions.
///
/// Two permissions with equal keys are equal. Keys are also what an
/// access-denied error carries back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionKey {
    pub kind: String,
    pub name: String,
    pub actions: String,
}

impl PermissionKey {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        actions: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            actions: actions.into(),
        }
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.actions.is_empty() {
            write!(f, "({} \"{}\")", self.kind, self.name)
        } else {
            write!(f, "({} \"{}\" \"{}\")", self.kind, self.name, self.actions)
        }
    }
}

/// Pluggable policy authority.
///
/// A policy maps a code source to the permissions it is granted. Results
/// must be deterministic for the same code source and policy state, so
/// callers are free to cache them. The default grant-file implementation is
/// `GrantPolicy` in `warden-policy`.
pub trait Policy: Send + Sync {
    /// The permissions granted to code from `code_source`.
    fn permissions(&self, code_source: &CodeSource) -> Permissions;

    /// The permissions granted to a protection domain.
    ///
    /// Defaults to the code source grants plus the domain's own static
    /// permissions.
    fn permissions_for_domain(&self, domain: &ProtectionDomain) -> Permissions {
        let granted = match domain.code_source() {
            Some(code_source) => self.permissions(code_source),
            None => Permissions::new(),
        };

        if let Some(static_permissions) = domain.permissions() {
            for permission in static_permissions.elements() {
                if let Err(e) = granted.add(permission) {
                    tracing::debug!(error = %e, "skipping static domain permission");
                }
            }
        }

        granted
    }

    /// Whether `domain` is granted `permission` by this policy.
    fn implies(&self, domain: &ProtectionDomain, permission: &dyn Permission) -> bool {
        self.permissions_for_domain(domain).implies(permission)
    }

    /// Reload policy state from its backing store.
    fn refresh(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
