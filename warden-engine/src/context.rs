//! Access control contexts.
//!
//! An [`AccessControlContext`] is the ordered set of protection domains whose
//! intersection of permissions bounds what the current operation may do. The
//! [`AccessController`] builds contexts from an explicit per-thread call
//! stack.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{DomainId, ProtectionDomain};
use crate::error::EngineError;
use crate::permission::Permission;

mod controller;

pub use controller::AccessController;

/// Security directive checked when attaching a combiner to a context.
pub const CREATE_CONTEXT_DIRECTIVE: &str = "createAccessControlContext";

/// Security directive checked when reading a context's combiner.
pub const GET_COMBINER_DIRECTIVE: &str = "getDomainCombiner";

/// Rewrites the domains of a context when it is combined with the call
/// stack.
///
/// `current` holds the stack domains (most recent first) and `assigned` the
/// domains of the privileged or inherited context the combiner belongs to.
/// Either may be absent. The result becomes the combined context's domains.
pub trait DomainCombiner: fmt::Debug + Send + Sync {
    fn combine(
        &self,
        current: Option<Vec<Arc<ProtectionDomain>>>,
        assigned: Option<Vec<Arc<ProtectionDomain>>>,
    ) -> Option<Vec<Arc<ProtectionDomain>>>;
}

/// An ordered, duplicate-free list of protection domains.
///
/// A context without domains is the system context: it allows everything.
#[derive(Clone, Default)]
pub struct AccessControlContext {
    domains: Option<Vec<Arc<ProtectionDomain>>>,
    combiner: Option<Arc<dyn DomainCombiner>>,
    privileged: bool,
}

impl AccessControlContext {
    /// Build a context from domains, dropping repeats but keeping the order
    /// of first occurrence.
    pub fn new(domains: Vec<Arc<ProtectionDomain>>) -> Self {
        Self {
            domains: normalize(domains),
            combiner: None,
            privileged: false,
        }
    }

    /// The system context.
    pub fn system() -> Self {
        Self::default()
    }

    /// Attach a combiner to `context`.
    ///
    /// Requires `SecurityPermission("createAccessControlContext")` in the
    /// current context.
    pub fn with_combiner(
        context: &AccessControlContext,
        combiner: Arc<dyn DomainCombiner>,
    ) -> Result<Self, EngineError> {
        AccessController::check_security_access(CREATE_CONTEXT_DIRECTIVE)?;
        Ok(Self {
            domains: context.domains.clone(),
            combiner: Some(combiner),
            privileged: context.privileged,
        })
    }

    pub(crate) fn from_parts(domains: Vec<Arc<ProtectionDomain>>, privileged: bool) -> Self {
        Self {
            domains: normalize(domains),
            combiner: None,
            privileged,
        }
    }

    /// The combiner, if any.
    ///
    /// Requires `SecurityPermission("getDomainCombiner")` in the current
    /// context.
    pub fn domain_combiner(&self) -> Result<Option<Arc<dyn DomainCombiner>>, EngineError> {
        AccessController::check_security_access(GET_COMBINER_DIRECTIVE)?;
        Ok(self.combiner.clone())
    }

    pub fn domains(&self) -> &[Arc<ProtectionDomain>] {
        self.domains.as_deref().unwrap_or(&[])
    }

    pub fn is_system(&self) -> bool {
        self.domains.is_none()
    }

    /// Whether this context was taken inside a privileged block.
    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    fn len(&self) -> usize {
        self.domains.as_ref().map_or(0, Vec::len)
    }

    /// Combine this stack snapshot with an assigned context.
    ///
    /// A combiner on `assigned` decides the result. Otherwise the stack
    /// domains come first, followed by assigned domains not already present.
    pub fn combine(&self, assigned: Option<&AccessControlContext>) -> AccessControlContext {
        let Some(assigned) = assigned else {
            return self.clone();
        };

        if let Some(combiner) = &assigned.combiner {
            debug!(
                stack = self.len(),
                assigned = assigned.len(),
                "delegating context combination to combiner"
            );
            let combined = combiner.combine(self.domains.clone(), assigned.domains.clone());
            return Self {
                domains: combined.and_then(normalize),
                combiner: Some(Arc::clone(combiner)),
                privileged: self.privileged,
            };
        }

        let stack_len = self.len();
        let assigned_len = assigned.len();

        if stack_len == 0 && assigned_len == 0 {
            return self.clone();
        }
        if stack_len == 0 && assigned_len <= 2 {
            return Self {
                domains: assigned.domains.clone(),
                combiner: None,
                privileged: self.privileged,
            };
        }
        if assigned_len == 0 && stack_len <= 2 {
            return self.clone();
        }
        if stack_len == 1 && assigned_len == 1 && self.domains() == assigned.domains() {
            return self.clone();
        }

        let mut merged = Vec::with_capacity(stack_len + assigned_len);
        merged.extend(self.domains().iter().cloned());
        merged.extend(assigned.domains().iter().cloned());

        Self {
            domains: normalize(merged),
            combiner: None,
            privileged: self.privileged,
        }
    }

    /// Check `permission` against every domain, most recent caller first.
    pub fn check_permission(&self, permission: &dyn Permission) -> Result<(), EngineError> {
        let Some(domains) = &self.domains else {
            return Ok(());
        };

        for domain in domains {
            if !domain.implies(permission) {
                warn!(
                    permission = %permission,
                    domain = %domain,
                    "access denied"
                );
                return Err(EngineError::AccessDenied {
                    permission: permission.key(),
                });
            }
        }

        Ok(())
    }

    fn domain_ids(&self) -> HashSet<DomainId> {
        self.domains().iter().map(|d| d.id()).collect()
    }
}

/// Drop repeated domains; an empty list becomes `None`.
fn normalize(domains: Vec<Arc<ProtectionDomain>>) -> Option<Vec<Arc<ProtectionDomain>>> {
    if domains.len() <= 1 {
        return (!domains.is_empty()).then_some(domains);
    }

    let mut seen = HashSet::with_capacity(domains.len());
    let unique: Vec<_> = domains
        .into_iter()
        .filter(|domain| seen.insert(domain.id()))
        .collect();
    Some(unique)
}

impl PartialEq for AccessControlContext {
    fn eq(&self, other: &Self) -> bool {
        let combiners_match = match (&self.combiner, &other.combiner) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            _ => false,
        };
        combiners_match && self.domain_ids() == other.domain_ids()
    }
}

impl Eq for AccessControlContext {}

impl Hash for AccessControlContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let folded = self
            .domains()
            .iter()
            .fold(0u128, |acc, domain| acc ^ domain.id().as_u128());
        folded.hash(state);
    }
}

impl fmt::Debug for AccessControlContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Option<Vec<DomainId>> = self
            .domains
            .as_ref()
            .map(|domains| domains.iter().map(|d| d.id()).collect());
        f.debug_struct("AccessControlContext")
            .field("domains", &ids)
            .field("combiner", &self.combiner)
            .field("privileged", &self.privileged)
            .finish()
    }
}
