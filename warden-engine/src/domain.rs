//! Code sources and protection domains.
//!
//! A [`CodeSource`] names where code came from and who signed it. A
//! [`ProtectionDomain`] binds a code source to the permissions granted to
//! it; the grant is sealed when the domain is built, so checks against a
//! domain never race with writers.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use url::Url;
use uuid::Uuid;

use crate::error::EngineError;
use crate::permission::{Permission, PermissionCollection};
use crate::types::{Certificate, Policy, Principal};

/// Origin of code: a location and the certificates that signed it.
///
/// A missing location or signer set places no constraint in
/// [`CodeSource::implies`]. Equality compares the location and the signer
/// *set*; certificate order does not matter.
#[derive(Debug, Clone)]
pub struct CodeSource {
    location: Option<Url>,
    signers: Option<Vec<Certificate>>,
}

impl CodeSource {
    pub fn new(location: Option<Url>, signers: Option<Vec<Certificate>>) -> Self {
        let signers = signers.filter(|certs| !certs.is_empty()).map(|certs| {
            let mut unique: Vec<Certificate> = Vec::with_capacity(certs.len());
            for cert in certs {
                if !unique.contains(&cert) {
                    unique.push(cert);
                }
            }
            unique
        });
        Self { location, signers }
    }

    /// Parse `location` as a URL for an unsigned code source.
    pub fn from_location(location: &str) -> Result<Self, EngineError> {
        let url = Url::parse(location).map_err(|e| EngineError::InvalidLocation {
            location: location.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(Some(url), None))
    }

    /// A code source that matches any location and any signers.
    pub fn any() -> Self {
        Self {
            location: None,
            signers: None,
        }
    }

    pub fn with_signers(self, signers: Vec<Certificate>) -> Self {
        Self::new(self.location, Some(signers))
    }

    pub fn location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    pub fn signers(&self) -> Option<&[Certificate]> {
        self.signers.as_deref()
    }

    /// Whether code from `other` also satisfies this code source.
    ///
    /// Every signer required here must have signed `other`, and `other`'s
    /// location must match this location: equal, or within it when this
    /// path ends in `/-` (recursive) or `/*` (one directory).
    pub fn implies(&self, other: &CodeSource) -> bool {
        self.match_signers(other) && self.match_location(other)
    }

    fn match_signers(&self, other: &CodeSource) -> bool {
        let Some(required) = &self.signers else {
            return true;
        };
        let Some(present) = &other.signers else {
            return false;
        };
        required.iter().all(|cert| present.contains(cert))
    }

    fn match_location(&self, other: &CodeSource) -> bool {
        let Some(this) = &self.location else {
            return true;
        };
        let Some(that) = &other.location else {
            return false;
        };
        if this == that {
            return true;
        }

        if this.scheme() != that.scheme() {
            return false;
        }

        match (this.host_str(), that.host_str()) {
            (None, _) | (Some(""), _) => {}
            (Some(host), Some(other_host)) if host.eq_ignore_ascii_case(other_host) => {}
            _ => return false,
        }

        if let Some(port) = this.port() {
            if that.port_or_known_default() != Some(port) {
                return false;
            }
        }

        let path = this.path();
        let other_path = that.path();
        if path != other_path {
            if let Some(prefix) = path.strip_suffix('-').filter(|p| p.ends_with('/')) {
                if !other_path.starts_with(prefix) {
                    return false;
                }
            } else if let Some(dir) = path.strip_suffix('*').filter(|p| p.ends_with('/')) {
                let Some(last) = other_path.rfind('/') else {
                    return false;
                };
                if dir != &other_path[..=last] {
                    return false;
                }
            } else {
                let with_slash = format!("{path}/");
                if other_path != with_slash {
                    return false;
                }
            }
        }

        match this.fragment() {
            Some(fragment) => that.fragment() == Some(fragment),
            None => true,
        }
    }

    fn signer_set(&self) -> Option<BTreeSet<&Certificate>> {
        self.signers.as_ref().map(|certs| certs.iter().collect())
    }
}

impl PartialEq for CodeSource {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location && self.signer_set() == other.signer_set()
    }
}

impl Eq for CodeSource {}

impl Hash for CodeSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
        self.signer_set().hash(state);
    }
}

impl fmt::Display for CodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "({location}")?,
            None => write!(f, "(<any location>")?,
        }
        match &self.signers {
            Some(signers) => {
                let subjects: Vec<&str> = signers.iter().map(Certificate::subject).collect();
                write!(f, " signed by [{}])", subjects.join(", "))
            }
            None => write!(f, " <no signer certificates>)"),
        }
    }
}

/// Identity of a protection domain.
///
/// Contexts deduplicate and compare domains by this id; clones of an
/// `Arc<ProtectionDomain>` share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(Uuid);

impl DomainId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub(crate) fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A code source bound to an immutable grant.
///
/// Static domains consult only their own permissions. Domains built with
/// [`ProtectionDomain::with_policy`] also ask the policy, so later policy
/// refreshes are visible to them.
pub struct ProtectionDomain {
    id: DomainId,
    code_source: Option<CodeSource>,
    permissions: Option<Arc<dyn PermissionCollection>>,
    principals: Vec<Principal>,
    policy: Option<Arc<dyn Policy>>,
}

impl ProtectionDomain {
    /// Create a static domain; `permissions` is sealed here.
    pub fn new(
        code_source: Option<CodeSource>,
        permissions: Option<Arc<dyn PermissionCollection>>,
    ) -> Self {
        if let Some(permissions) = &permissions {
            permissions.set_read_only();
        }
        Self {
            id: DomainId::generate(),
            code_source,
            permissions,
            principals: Vec::new(),
            policy: None,
        }
    }

    /// Create a domain that also consults `policy` on every check.
    pub fn with_policy(
        code_source: Option<CodeSource>,
        permissions: Option<Arc<dyn PermissionCollection>>,
        principals: Vec<Principal>,
        policy: Arc<dyn Policy>,
    ) -> Self {
        let mut domain = Self::new(code_source, permissions);
        domain.principals = principals;
        domain.policy = Some(policy);
        domain
    }

    pub fn id(&self) -> DomainId {
        self.id
    }

    pub fn code_source(&self) -> Option<&CodeSource> {
        self.code_source.as_ref()
    }

    pub fn permissions(&self) -> Option<&Arc<dyn PermissionCollection>> {
        self.permissions.as_ref()
    }

    pub fn principals(&self) -> &[Principal] {
        &self.principals
    }

    pub fn is_static(&self) -> bool {
        self.policy.is_none()
    }

    pub fn implies(&self, permission: &dyn Permission) -> bool {
        if let Some(policy) = &self.policy {
            if policy.implies(self, permission) {
                return true;
            }
        }

        match &self.permissions {
            Some(permissions) => permissions.implies(permission),
            None => false,
        }
    }
}

impl PartialEq for ProtectionDomain {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProtectionDomain {}

impl fmt::Debug for ProtectionDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectionDomain")
            .field("id", &self.id)
            .field("code_source", &self.code_source)
            .field("principals", &self.principals)
            .field("static", &self.is_static())
            .finish()
    }
}

impl fmt::Display for ProtectionDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code_source {
            Some(code_source) => write!(f, "ProtectionDomain {} {}", self.id, code_source),
            None => write!(f, "ProtectionDomain {} <no code source>", self.id),
        }
    }
}
