//! The security engine: binds a policy to protection domain creation and
//! permission checks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::context::{AccessControlContext, AccessController};
use crate::domain::{CodeSource, ProtectionDomain};
use crate::error::EngineError;
use crate::permission::Permission;
use crate::types::{Policy, Principal};

/// Builds protection domains from a [`Policy`] and checks permissions
/// against them.
///
/// Static domains are cached per code source, so repeated checks for the
/// same code share one sealed grant. [`SecurityEngine::refresh`] reloads the
/// policy and drops the cache.
pub struct SecurityEngine<P: Policy> {
    policy: Arc<P>,
    domains: Mutex<HashMap<CodeSource, Arc<ProtectionDomain>>>,
}

impl<P: Policy + 'static> SecurityEngine<P> {
    pub fn new(policy: P) -> Self {
        Self::from_arc(Arc::new(policy))
    }

    pub fn from_arc(policy: Arc<P>) -> Self {
        Self {
            policy,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Get a reference to the policy.
    pub fn policy(&self) -> &Arc<P> {
        &self.policy
    }

    // =========================================================================
    // Domains
    // =========================================================================

    /// The static protection domain for `code_source`.
    pub fn domain_for(&self, code_source: &CodeSource) -> Arc<ProtectionDomain> {
        let mut domains = self.domains.lock();
        if let Some(domain) = domains.get(code_source) {
            debug!(code_source = %code_source, "domain cache hit");
            return Arc::clone(domain);
        }

        let permissions = self.policy.permissions(code_source);
        let domain = Arc::new(ProtectionDomain::new(
            Some(code_source.clone()),
            Some(Arc::new(permissions)),
        ));
        debug!(code_source = %code_source, domain = %domain.id(), "created protection domain");
        domains.insert(code_source.clone(), Arc::clone(&domain));
        domain
    }

    /// A domain that consults the policy on every check.
    ///
    /// Dynamic domains see policy refreshes and principal-based grants; they
    /// are not cached.
    pub fn dynamic_domain_for(
        &self,
        code_source: &CodeSource,
        principals: Vec<Principal>,
    ) -> Arc<ProtectionDomain> {
        let policy: Arc<dyn Policy> = self.policy.clone();
        Arc::new(ProtectionDomain::with_policy(
            Some(code_source.clone()),
            None,
            principals,
            policy,
        ))
    }

    /// A context holding the domains of `code_sources`, most recent caller
    /// first.
    pub fn context_for(&self, code_sources: &[CodeSource]) -> AccessControlContext {
        AccessControlContext::new(code_sources.iter().map(|cs| self.domain_for(cs)).collect())
    }

    /// Run `f` as code from `code_source`.
    pub fn run_as_code<R>(&self, code_source: &CodeSource, f: impl FnOnce() -> R) -> R {
        AccessController::run_as(self.domain_for(code_source), f)
    }

    // =========================================================================
    // Checks
    // =========================================================================

    /// Check `permission` for code from `code_source` alone.
    pub fn check_permission(
        &self,
        code_source: &CodeSource,
        permission: &dyn Permission,
    ) -> Result<(), EngineError> {
        self.context_for(std::slice::from_ref(code_source))
            .check_permission(permission)
    }

    /// Reload the policy and forget cached domains.
    pub fn refresh(&self) -> Result<(), EngineError> {
        self.policy.refresh()?;
        let dropped = {
            let mut domains = self.domains.lock();
            let dropped = domains.len();
            domains.clear();
            dropped
        };
        info!(dropped, "policy refreshed");
        Ok(())
    }

    /// Number of cached static domains.
    pub fn cached_domains(&self) -> usize {
        self.domains.lock().len()
    }
}
