//! # Warden
//!
//! Convenience crate that re-exports the Warden access control engine, the
//! default grant-file policy and the provider registry, plus a process-wide
//! [`SecurityContext`].
//!
//! For custom policy backends, depend on `warden-engine` directly.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden::{
//!     AccessController, CodeSource, GrantPolicy, PropertyPermission, SecurityEngine,
//! };
//!
//! let policy = GrantPolicy::from_toml(r#"
//!     [[grants]]
//!     code_base = "file:/srv/app/-"
//!     permissions = [
//!         { kind = "PropertyPermission", name = "app.*", actions = "read" },
//!     ]
//! "#).expect("Failed to parse policy");
//!
//! let engine = SecurityEngine::new(policy);
//! let app = CodeSource::from_location("file:/srv/app/bin/tool").expect("valid location");
//!
//! engine.run_as_code(&app, || {
//!     let read = PropertyPermission::new("app.name", "read").expect("valid permission");
//!     AccessController::check_permission(&read).expect("access denied");
//! });
//! ```

mod security;

pub use security::{global, init, SecurityContext};

// Re-export everything from the engine crate
pub use warden_engine::*;

// Re-export the default policy backend
pub use warden_policy::{GrantPolicy, PolicyConfig, PolicyConfigError};

// Re-export the provider registry
pub use warden_provider::{
    CacheSizes, EngineType, FactoryError, Implementation, Instance, Params, Provider,
    ProviderError, ProviderLoader, ProviderProperty, ProviderRegistry, SecurityProperties,
    ServiceClass,
};
