//! # Warden Policy
//!
//! Default grant-file policy backend for the Warden access control engine.
//!
//! Provides TOML-based configuration for granting permissions to code by
//! code base, signer certificates and principals.

mod config;
mod matching;
mod policy;

pub use config::{
    CertificateConfig, GrantConfig, PermissionConfig, PolicyConfig, PolicyConfigError,
    PrincipalConfig,
};
pub use policy::GrantPolicy;
