//! Permissions whose kind was not known when they were granted.
//!
//! A policy may name a permission kind nothing in the process has
//! constructed yet. Such grants are held as [`UnresolvedPermission`]s keyed
//! by kind name and turned into real permissions the first time a
//! permission of that kind is registered with a [`super::Permissions`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::Permission;
use crate::error::EngineError;
use crate::types::Certificate;

/// A deferred grant: target kind name, name, actions and the certificates
/// the resolving kind must be signed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedPermission {
    target_kind: String,
    name: String,
    actions: String,
    certs: Vec<Certificate>,
}

impl UnresolvedPermission {
    pub fn new(
        target_kind: impl Into<String>,
        name: impl Into<String>,
        actions: impl Into<String>,
        certs: Vec<Certificate>,
    ) -> Self {
        Self {
            target_kind: target_kind.into(),
            name: name.into(),
            actions: actions.into(),
            certs,
        }
    }

    pub fn target_kind(&self) -> &str {
        &self.target_kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actions(&self) -> &str {
        &self.actions
    }

    pub fn certs(&self) -> &[Certificate] {
        &self.certs
    }

    /// Resolve against a real permission of the target kind.
    ///
    /// When certificates were required, every one of them must be among the
    /// exemplar kind's signers. Returns `None` when the kind differs, the
    /// signer constraint fails, or the kind rejects the name/actions.
    pub fn resolve(&self, exemplar: &dyn Permission) -> Option<Arc<dyn Permission>> {
        if exemplar.kind() != self.target_kind {
            return None;
        }

        if !self.certs.is_empty() {
            let signers = exemplar.signers();
            if !self.certs.iter().all(|cert| signers.contains(cert)) {
                debug!(
                    kind = %self.target_kind,
                    name = %self.name,
                    "unresolved permission signer mismatch"
                );
                return None;
            }
        }

        match exemplar.instantiate(&self.name, &self.actions) {
            Ok(permission) => Some(permission),
            Err(e) => {
                debug!(
                    kind = %self.target_kind,
                    name = %self.name,
                    error = %e,
                    "failed to resolve permission"
                );
                None
            }
        }
    }
}

impl fmt::Display for UnresolvedPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(unresolved {} \"{}\" \"{}\")",
            self.target_kind, self.name, self.actions
        )
    }
}

/// Deferred permissions grouped by target kind name.
#[derive(Debug, Default)]
pub struct UnresolvedPermissionCollection {
    perms: RwLock<HashMap<String, Vec<UnresolvedPermission>>>,
    read_only: AtomicBool,
}

impl UnresolvedPermissionCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, permission: UnresolvedPermission) -> Result<(), EngineError> {
        let mut perms = self.perms.write();
        if self.read_only.load(Ordering::Acquire) {
            return Err(EngineError::ReadOnly {
                collection: "UnresolvedPermissionCollection",
            });
        }
        perms
            .entry(permission.target_kind.clone())
            .or_default()
            .push(permission);
        Ok(())
    }

    /// The deferred permissions waiting for `kind`.
    pub fn pending(&self, kind: &str) -> Vec<UnresolvedPermission> {
        self.perms.read().get(kind).cloned().unwrap_or_default()
    }

    /// Remove and return the deferred permissions waiting for `kind`.
    pub fn take(&self, kind: &str) -> Vec<UnresolvedPermission> {
        self.perms.write().remove(kind).unwrap_or_default()
    }

    /// Put back permissions of `kind` that failed to resolve. Unlike
    /// [`UnresolvedPermissionCollection::add`] this is allowed after sealing,
    /// since nothing new is granted.
    pub(crate) fn restore(&self, kind: &str, permissions: Vec<UnresolvedPermission>) {
        if permissions.is_empty() {
            return;
        }
        self.perms
            .write()
            .entry(kind.to_string())
            .or_default()
            .extend(permissions);
    }

    /// Deferred grants never imply anything until resolved.
    pub fn implies(&self, _permission: &dyn Permission) -> bool {
        false
    }

    pub fn elements(&self) -> Vec<UnresolvedPermission> {
        self.perms.read().values().flatten().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.perms.read().is_empty()
    }

    pub fn set_read_only(&self) {
        let _perms = self.perms.write();
        self.read_only.store(true, Ordering::Release);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::BasicPermission;

    /// A kind whose signers can be chosen by the test.
    #[derive(Debug)]
    struct SignedKind {
        signers: Vec<Certificate>,
    }

    impl Permission for SignedKind {
        fn kind(&self) -> &str {
            "SignedKind"
        }

        fn name(&self) -> &str {
            "exemplar"
        }

        fn implies(&self, other: &dyn Permission) -> bool {
            other.kind() == "SignedKind"
        }

        fn instantiate(
            &self,
            _name: &str,
            _actions: &str,
        ) -> Result<Arc<dyn Permission>, EngineError> {
            Ok(Arc::new(SignedKind {
                signers: self.signers.clone(),
            }))
        }

        fn signers(&self) -> &[Certificate] {
            &self.signers
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_resolve_against_same_kind() {
        let pending = UnresolvedPermission::new("RuntimePermission", "exitVM", "", vec![]);
        let exemplar = BasicPermission::runtime("setIO").unwrap();

        let resolved = pending.resolve(&exemplar).expect("should resolve");
        assert_eq!(resolved.kind(), "RuntimePermission");
        assert_eq!(resolved.name(), "exitVM");
    }

    #[test]
    fn test_resolve_wrong_kind() {
        let pending = UnresolvedPermission::new("SecurityPermission", "x", "", vec![]);
        assert!(pending.resolve(&BasicPermission::runtime("x").unwrap()).is_none());
    }

    #[test]
    fn test_resolve_rejected_name() {
        let pending = UnresolvedPermission::new("RuntimePermission", "", "", vec![]);
        assert!(pending.resolve(&BasicPermission::runtime("x").unwrap()).is_none());
    }

    #[test]
    fn test_signer_constraint() {
        let vendor = Certificate::new("CN=vendor", b"vendor".to_vec());
        let other = Certificate::new("CN=other", b"other".to_vec());
        let pending = UnresolvedPermission::new("SignedKind", "x", "", vec![vendor.clone()]);

        let unsigned = SignedKind { signers: vec![] };
        assert!(pending.resolve(&unsigned).is_none());

        let wrong = SignedKind {
            signers: vec![other],
        };
        assert!(pending.resolve(&wrong).is_none());

        let signed = SignedKind {
            signers: vec![vendor],
        };
        assert!(pending.resolve(&signed).is_some());
    }

    #[test]
    fn test_collection_groups_by_kind() {
        let collection = UnresolvedPermissionCollection::new();
        collection
            .add(UnresolvedPermission::new("A", "one", "", vec![]))
            .unwrap();
        collection
            .add(UnresolvedPermission::new("A", "two", "", vec![]))
            .unwrap();
        collection
            .add(UnresolvedPermission::new("B", "three", "", vec![]))
            .unwrap();

        assert_eq!(collection.pending("A").len(), 2);
        assert_eq!(collection.pending("B").len(), 1);
        assert!(collection.pending("C").is_empty());
        assert_eq!(collection.elements().len(), 3);
        assert!(!collection.implies(&BasicPermission::runtime("one").unwrap()));

        assert_eq!(collection.take("A").len(), 2);
        assert!(collection.pending("A").is_empty());
        assert!(collection.take("A").is_empty());
        assert_eq!(collection.elements().len(), 1);

        collection.set_read_only();
        assert!(collection
            .add(UnresolvedPermission::new("C", "four", "", vec![]))
            .is_err());
    }
}
