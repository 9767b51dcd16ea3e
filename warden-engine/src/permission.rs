//! The permission algebra.
//!
//! A [`Permission`] describes a capability as a `(kind, name, actions)`
//! tuple. Permissions of one kind are stored in a homogeneous
//! [`PermissionCollection`] whose `implies` encodes that kind's matching
//! rules; [`Permissions`] routes a heterogeneous set to the right
//! collections.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;
use crate::types::{Certificate, PermissionKey};

mod all;
mod basic;
mod hash;
mod permissions;
mod property;
mod unresolved;

pub use all::{AllPermission, AllPermissionCollection, ALL_PERMISSION_KIND};
pub use basic::{
    BasicPermission, BasicPermissionCollection, RUNTIME_PERMISSION_KIND,
    SECURITY_PERMISSION_KIND,
};
pub use hash::PermissionsHash;
pub use permissions::Permissions;
pub use property::{PropertyPermission, PROPERTY_PERMISSION_KIND};
pub use unresolved::{UnresolvedPermission, UnresolvedPermissionCollection};

/// A capability descriptor.
///
/// Implementations must be immutable after construction and keep `implies`
/// consistent with equality: every permission implies itself. Permissions of
/// different kinds never imply one another; only [`AllPermission`] crosses
/// kinds.
pub trait Permission: fmt::Debug + Send + Sync + 'static {
    /// The kind label. Part of the permission's identity.
    fn kind(&self) -> &str;

    /// The target name, e.g. `exitVM` or `app.config.*`.
    fn name(&self) -> &str;

    /// Canonical actions string; empty for kinds without actions.
    fn actions(&self) -> &str {
        ""
    }

    /// Whether every access `other` allows is also allowed by `self`.
    fn implies(&self, other: &dyn Permission) -> bool;

    /// A collection specialised for this kind, or `None` for the default
    /// [`PermissionsHash`].
    fn new_collection(&self) -> Option<Box<dyn PermissionCollection>> {
        None
    }

    /// Build another permission of this kind from a name and actions.
    ///
    /// Deferred grants are resolved through the first real permission of
    /// their kind, so every kind acts as its own factory.
    fn instantiate(&self, name: &str, actions: &str) -> Result<Arc<dyn Permission>, EngineError>;

    /// Certificates that vouch for this permission kind.
    fn signers(&self) -> &[Certificate] {
        &[]
    }

    fn as_any(&self) -> &dyn Any;
}

impl dyn Permission {
    /// The `(kind, name, actions)` identity tuple.
    pub fn key(&self) -> PermissionKey {
        PermissionKey::new(self.kind(), self.name(), self.actions())
    }

    pub fn downcast_ref<T: Permission>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for dyn Permission {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind()
            && self.name() == other.name()
            && self.actions() == other.actions()
    }
}

impl Eq for dyn Permission {}

impl fmt::Display for dyn Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A homogeneous, mutable-until-sealed set of permissions.
///
/// Collections use interior mutability so they can be shared between a
/// policy, the domains built from it and concurrent checkers. Once
/// `set_read_only` returns, every later `add` fails and leaves the
/// collection untouched.
pub trait PermissionCollection: fmt::Debug + Send + Sync {
    /// Add a permission.
    fn add(&self, permission: Arc<dyn Permission>) -> Result<(), EngineError>;

    /// Whether the permissions held imply `permission`.
    fn implies(&self, permission: &dyn Permission) -> bool;

    /// Snapshot of the permissions held.
    fn elements(&self) -> Vec<Arc<dyn Permission>>;

    /// Seal the collection.
    fn set_read_only(&self);

    fn is_read_only(&self) -> bool;
}

/// A granted permission, either of a known kind or deferred until its kind
/// becomes known.
#[derive(Debug, Clone)]
pub enum Grant {
    Resolved(Arc<dyn Permission>),
    Unresolved(UnresolvedPermission),
}

impl Grant {
    /// Resolve a deferred grant against a real permission of its kind.
    ///
    /// Resolved grants, grants of another kind and grants whose signer
    /// constraint is not met are returned unchanged.
    pub fn resolve(self, exemplar: &dyn Permission) -> Grant {
        match self {
            Grant::Unresolved(pending) if pending.target_kind() == exemplar.kind() => {
                match pending.resolve(exemplar) {
                    Some(permission) => Grant::Resolved(permission),
                    None => Grant::Unresolved(pending),
                }
            }
            other => other,
        }
    }
}

impl From<Arc<dyn Permission>> for Grant {
    fn from(permission: Arc<dyn Permission>) -> Self {
        Grant::Resolved(permission)
    }
}

impl From<UnresolvedPermission> for Grant {
    fn from(permission: UnresolvedPermission) -> Self {
        Grant::Unresolved(permission)
    }
}
