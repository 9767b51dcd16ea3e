//! The universal permission.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Permission, PermissionCollection};
use crate::error::EngineError;

pub const ALL_PERMISSION_KIND: &str = "AllPermission";

/// Implies every permission, of every kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AllPermission;

impl AllPermission {
    pub fn new() -> Self {
        Self
    }

    pub fn into_arc(self) -> Arc<dyn Permission> {
        Arc::new(self)
    }
}

impl Permission for AllPermission {
    fn kind(&self) -> &str {
        ALL_PERMISSION_KIND
    }

    fn name(&self) -> &str {
        "<all permissions>"
    }

    fn actions(&self) -> &str {
        "<all actions>"
    }

    fn implies(&self, _other: &dyn Permission) -> bool {
        true
    }

    fn new_collection(&self) -> Option<Box<dyn PermissionCollection>> {
        Some(Box::new(AllPermissionCollection::new()))
    }

    fn instantiate(&self, _name: &str, _actions: &str) -> Result<Arc<dyn Permission>, EngineError> {
        Ok(Arc::new(AllPermission))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Implies everything once an [`AllPermission`] has been added, nothing before.
#[derive(Debug, Default)]
pub struct AllPermissionCollection {
    all_allowed: AtomicBool,
    read_only: AtomicBool,
    guard: parking_lot::Mutex<()>,
}

impl AllPermissionCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PermissionCollection for AllPermissionCollection {
    fn add(&self, permission: Arc<dyn Permission>) -> Result<(), EngineError> {
        let _guard = self.guard.lock();
        if self.read_only.load(Ordering::Acquire) {
            return Err(EngineError::ReadOnly {
                collection: "AllPermissionCollection",
            });
        }
        if permission.downcast_ref::<AllPermission>().is_none() {
            return Err(EngineError::KindMismatch {
                collection: "AllPermissionCollection",
                expected: ALL_PERMISSION_KIND.to_string(),
                found: permission.kind().to_string(),
            });
        }

        self.all_allowed.store(true, Ordering::Release);
        Ok(())
    }

    fn implies(&self, _permission: &dyn Permission) -> bool {
        self.all_allowed.load(Ordering::Acquire)
    }

    fn elements(&self) -> Vec<Arc<dyn Permission>> {
        if self.all_allowed.load(Ordering::Acquire) {
            vec![AllPermission.into_arc()]
        } else {
            Vec::new()
        }
    }

    fn set_read_only(&self) {
        let _guard = self.guard.lock();
        self.read_only.store(true, Ordering::Release);
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::BasicPermission;

    #[test]
    fn test_all_permission_implies_anything() {
        let all = AllPermission::new();
        assert!(all.implies(&BasicPermission::runtime("exitVM").unwrap()));
        assert!(all.implies(&AllPermission));
    }

    #[test]
    fn test_collection_empty_implies_nothing() {
        let collection = AllPermissionCollection::new();
        assert!(!collection.implies(&BasicPermission::runtime("exitVM").unwrap()));
        assert!(collection.elements().is_empty());

        collection.add(AllPermission.into_arc()).unwrap();
        assert!(collection.implies(&BasicPermission::runtime("exitVM").unwrap()));
        assert_eq!(collection.elements().len(), 1);
    }

    #[test]
    fn test_collection_rejects_other_kinds() {
        let collection = AllPermissionCollection::new();
        let result = collection.add(BasicPermission::runtime("exitVM").unwrap().into_arc());
        assert!(result.is_err());
        assert!(!collection.implies(&AllPermission));
    }

    #[test]
    fn test_read_only() {
        let collection = AllPermissionCollection::new();
        collection.set_read_only();
        assert!(collection.add(AllPermission.into_arc()).is_err());
        assert!(!collection.implies(&AllPermission));
    }
}
