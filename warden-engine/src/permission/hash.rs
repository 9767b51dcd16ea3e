//! Default exact-match permission collection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Permission, PermissionCollection};
use crate::error::EngineError;
use crate::types::PermissionKey;

/// Collection for kinds that do not supply their own.
///
/// `implies` first looks up the query's identity tuple and asks the stored
/// permission. On a miss every stored permission is asked in turn, since a
/// broader permission (`user.*` against `user.home`) can imply a query it is
/// not equal to.
#[derive(Debug, Default)]
pub struct PermissionsHash {
    perms: RwLock<HashMap<PermissionKey, Arc<dyn Permission>>>,
    read_only: AtomicBool,
}

impl PermissionsHash {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PermissionCollection for PermissionsHash {
    fn add(&self, permission: Arc<dyn Permission>) -> Result<(), EngineError> {
        let mut perms = self.perms.write();
        if self.read_only.load(Ordering::Acquire) {
            return Err(EngineError::ReadOnly {
                collection: "PermissionsHash",
            });
        }
        perms.insert(permission.key(), permission);
        Ok(())
    }

    fn implies(&self, permission: &dyn Permission) -> bool {
        let perms = self.perms.read();
        match perms.get(&permission.key()) {
            Some(stored) => stored.implies(permission),
            None => perms.values().any(|stored| stored.implies(permission)),
        }
    }

    fn elements(&self) -> Vec<Arc<dyn Permission>> {
        self.perms.read().values().cloned().collect()
    }

    fn set_read_only(&self) {
        let _perms = self.perms.write();
        self.read_only.store(true, Ordering::Release);
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PropertyPermission;

    #[test]
    fn test_exact_hit() {
        let collection = PermissionsHash::new();
        collection
            .add(PropertyPermission::new("user.home", "read").unwrap().into_arc())
            .unwrap();
        assert!(collection.implies(&PropertyPermission::new("user.home", "read").unwrap()));
    }

    #[test]
    fn test_fallback_scan_finds_broader_permission() {
        let collection = PermissionsHash::new();
        collection
            .add(PropertyPermission::new("user.*", "read,write").unwrap().into_arc())
            .unwrap();

        assert!(collection.implies(&PropertyPermission::new("user.home", "read").unwrap()));
        assert!(collection.implies(&PropertyPermission::new("user.dir", "write").unwrap()));
        assert!(!collection.implies(&PropertyPermission::new("os.name", "read").unwrap()));
    }

    #[test]
    fn test_read_only() {
        let collection = PermissionsHash::new();
        collection.set_read_only();
        let result =
            collection.add(PropertyPermission::new("user.home", "read").unwrap().into_arc());
        assert!(matches!(result, Err(EngineError::ReadOnly { .. })));
        assert!(collection.elements().is_empty());
    }
}
