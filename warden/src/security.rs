//! The process-wide security context: the provider registry and the
//! installed policy.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::info;
use warden_engine::{AccessController, EngineError, Policy};
use warden_policy::GrantPolicy;
use warden_provider::{ProviderRegistry, SecurityProperties};

static GLOBAL: OnceCell<SecurityContext> = OnceCell::new();

/// A provider registry paired with the installed policy.
///
/// Replacing the policy requires `SecurityPermission("setPolicy")`; reading
/// it requires `SecurityPermission("getPolicy")`.
pub struct SecurityContext {
    registry: ProviderRegistry,
    policy: RwLock<Arc<dyn Policy>>,
}

impl SecurityContext {
    pub fn new(registry: ProviderRegistry, policy: Arc<dyn Policy>) -> Self {
        Self {
            registry,
            policy: RwLock::new(policy),
        }
    }

    /// A context built from security properties with an empty grant policy.
    pub fn from_properties(properties: SecurityProperties) -> Self {
        Self::new(ProviderRegistry::new(properties), Arc::new(GrantPolicy::empty()))
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// The installed policy.
    pub fn policy(&self) -> Result<Arc<dyn Policy>, EngineError> {
        AccessController::check_security_access("getPolicy")?;
        Ok(Arc::clone(&self.policy.read()))
    }

    /// Install `policy`, returning the one it replaces.
    pub fn set_policy(&self, policy: Arc<dyn Policy>) -> Result<Arc<dyn Policy>, EngineError> {
        AccessController::check_security_access("setPolicy")?;
        let previous = std::mem::replace(&mut *self.policy.write(), policy);
        info!("security policy replaced");
        Ok(previous)
    }

    /// Reload the installed policy from its backing store.
    pub fn refresh_policy(&self) -> Result<(), EngineError> {
        self.policy()?.refresh()
    }
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self::from_properties(SecurityProperties::default())
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Install the process-wide context.
///
/// Returns `false` if a context was already installed, either by an earlier
/// `init` or by a call to [`global`].
pub fn init(context: SecurityContext) -> bool {
    let installed = GLOBAL.set(context).is_ok();
    if installed {
        info!("security context installed");
    }
    installed
}

/// The process-wide context, created with defaults on first use if
/// [`init`] was never called.
pub fn global() -> &'static SecurityContext {
    GLOBAL.get_or_init(SecurityContext::default)
}
