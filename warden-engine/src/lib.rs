//! # Warden Engine
//!
//! Core access control engine for the Warden security system.
//!
//! This crate provides:
//! - A permission algebra with kind-specific collections and the
//!   heterogeneous `Permissions` aggregate
//! - Code sources and protection domains
//! - Access control contexts and the `AccessController` call stack
//! - `Policy` trait for pluggable grant authorities
//! - `SecurityEngine` that binds a policy to domain creation and checks

pub mod context;
pub mod domain;
pub mod engine;
pub mod error;
pub mod permission;
pub mod types;

pub use context::{AccessControlContext, AccessController, DomainCombiner};
pub use domain::{CodeSource, DomainId, ProtectionDomain};
pub use engine::SecurityEngine;
pub use error::EngineError;
pub use permission::{
    AllPermission, BasicPermission, Grant, Permission, PermissionCollection, Permissions,
    PermissionsHash, PropertyPermission, UnresolvedPermission,
};
pub use types::{Certificate, PermissionKey, Policy, Principal};

pub use url::Url;
