//! The heterogeneous permission aggregate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::debug;

use super::all::ALL_PERMISSION_KIND;
use super::hash::PermissionsHash;
use super::unresolved::{UnresolvedPermission, UnresolvedPermissionCollection};
use super::{Grant, Permission, PermissionCollection};
use crate::error::EngineError;

/// A set of permissions of any kinds.
///
/// Each kind gets its own collection, created on first use from the
/// permission's `new_collection` (or a [`PermissionsHash`]). Readers look up
/// collections without taking the aggregate lock; creating a collection is
/// re-checked under it so two threads never build two collections for one
/// kind. The `AllPermission` collection is cached for a constant-time
/// universal check.
#[derive(Debug, Default)]
pub struct Permissions {
    per_kind: DashMap<String, Arc<dyn PermissionCollection>>,
    create_lock: Mutex<()>,
    all_permission: OnceCell<Arc<dyn PermissionCollection>>,
    unresolved: UnresolvedPermissionCollection,
    read_only: AtomicBool,
}

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an aggregate from grants, deferring unresolved ones.
    pub fn from_grants(grants: impl IntoIterator<Item = Grant>) -> Result<Self, EngineError> {
        let permissions = Self::new();
        for grant in grants {
            permissions.add_grant(grant)?;
        }
        Ok(permissions)
    }

    pub fn add_grant(&self, grant: Grant) -> Result<(), EngineError> {
        match grant {
            Grant::Resolved(permission) => self.add(permission),
            Grant::Unresolved(pending) => self.add_unresolved(pending),
        }
    }

    /// Defer a permission of a kind that may not be known yet.
    ///
    /// If a collection for the kind already exists, the permission is
    /// resolved against one of its members straight away.
    pub fn add_unresolved(&self, pending: UnresolvedPermission) -> Result<(), EngineError> {
        if self.is_read_only() {
            return Err(EngineError::ReadOnly {
                collection: "Permissions",
            });
        }

        // held so a collection created concurrently cannot miss this grant
        let _create = self.create_lock.lock();
        let existing = self
            .per_kind
            .get(pending.target_kind())
            .map(|entry| Arc::clone(entry.value()));
        let Some(collection) = existing else {
            return self.unresolved.add(pending);
        };

        let grant = match collection.elements().into_iter().next() {
            Some(exemplar) => Grant::from(pending).resolve(exemplar.as_ref()),
            None => Grant::from(pending),
        };
        match grant {
            Grant::Resolved(permission) => collection.add(permission),
            Grant::Unresolved(pending) => self.unresolved.add(pending),
        }
    }

    /// Deferred permissions still waiting for their kind.
    pub fn unresolved(&self) -> Vec<UnresolvedPermission> {
        self.unresolved.elements()
    }

    /// Whether an `AllPermission` has been granted.
    pub fn has_all_permission(&self) -> bool {
        self.all_permission
            .get()
            .map(|all| !all.elements().is_empty())
            .unwrap_or(false)
    }

    /// Number of per-kind collections.
    pub fn kind_count(&self) -> usize {
        self.per_kind.len()
    }

    /// Find the collection for `permission`'s kind, creating it when
    /// `create_empty` is set or when deferred permissions of the kind can be
    /// resolved into it.
    fn collection_for(
        &self,
        permission: &dyn Permission,
        create_empty: bool,
    ) -> Option<Arc<dyn PermissionCollection>> {
        if let Some(entry) = self.per_kind.get(permission.kind()) {
            return Some(Arc::clone(entry.value()));
        }

        let _create = self.create_lock.lock();
        if let Some(entry) = self.per_kind.get(permission.kind()) {
            return Some(Arc::clone(entry.value()));
        }

        let collection = match self.resolve_pending(permission) {
            Some(collection) => collection,
            None if create_empty => new_collection_for(permission),
            None => return None,
        };

        if self.is_read_only() {
            collection.set_read_only();
        }
        if permission.kind() == ALL_PERMISSION_KIND {
            let _ = self.all_permission.set(Arc::clone(&collection));
        }
        self.per_kind
            .insert(permission.kind().to_string(), Arc::clone(&collection));
        Some(collection)
    }

    /// Fold deferred permissions of `exemplar`'s kind into a fresh collection.
    ///
    /// Called under `create_lock`. Resolved grants leave the pending store;
    /// grants that fail to resolve (e.g. a signer mismatch) stay in it.
    fn resolve_pending(&self, exemplar: &dyn Permission) -> Option<Arc<dyn PermissionCollection>> {
        let pending = self.unresolved.take(exemplar.kind());
        if pending.is_empty() {
            return None;
        }

        let total = pending.len();
        let collection = new_collection_for(exemplar);
        let mut resolved = 0usize;
        let mut still_pending = Vec::new();
        for grant in pending.into_iter().map(Grant::from) {
            match grant.resolve(exemplar) {
                Grant::Resolved(permission) => match collection.add(permission) {
                    Ok(()) => resolved += 1,
                    Err(e) => debug!(error = %e, "dropping resolved permission"),
                },
                Grant::Unresolved(unresolved) => still_pending.push(unresolved),
            }
        }
        self.unresolved.restore(exemplar.kind(), still_pending);

        debug!(
            kind = exemplar.kind(),
            pending = total,
            resolved,
            "resolved deferred permissions"
        );

        (resolved > 0).then_some(collection)
    }
}

fn new_collection_for(permission: &dyn Permission) -> Arc<dyn PermissionCollection> {
    match permission.new_collection() {
        Some(collection) => Arc::from(collection),
        None => Arc::new(PermissionsHash::new()),
    }
}

impl PermissionCollection for Permissions {
    fn add(&self, permission: Arc<dyn Permission>) -> Result<(), EngineError> {
        if self.is_read_only() {
            return Err(EngineError::ReadOnly {
                collection: "Permissions",
            });
        }

        let Some(collection) = self.collection_for(permission.as_ref(), true) else {
            return Err(EngineError::InvalidPermission(format!(
                "no collection for {}",
                permission.key()
            )));
        };
        collection.add(permission)
    }

    fn implies(&self, permission: &dyn Permission) -> bool {
        if let Some(all) = self.all_permission.get() {
            if all.implies(permission) {
                return true;
            }
        }

        match self.collection_for(permission, false) {
            Some(collection) => collection.implies(permission),
            None => false,
        }
    }

    fn elements(&self) -> Vec<Arc<dyn Permission>> {
        self.per_kind
            .iter()
            .flat_map(|entry| entry.value().elements())
            .collect()
    }

    fn set_read_only(&self) {
        let _create = self.create_lock.lock();
        self.read_only.store(true, Ordering::Release);
        for entry in self.per_kind.iter() {
            entry.value().set_read_only();
        }
        self.unresolved.set_read_only();
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }
}
