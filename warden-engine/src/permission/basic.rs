//! Named permissions with hierarchical wildcard matching.
//!
//! Names are dot-separated paths. A name ending in `.*` (or the bare `*`)
//! implies every name that extends its prefix by at least one more segment.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Permission, PermissionCollection};
use crate::error::EngineError;

pub const RUNTIME_PERMISSION_KIND: &str = "RuntimePermission";
pub const SECURITY_PERMISSION_KIND: &str = "SecurityPermission";

/// A parsed dotted name: `a.b.*` becomes wildcard `a.b.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct NamePattern {
    wildcard: bool,
    path: String,
}

impl NamePattern {
    pub(crate) fn parse(name: &str) -> Result<Self, EngineError> {
        if name.is_empty() {
            return Err(EngineError::InvalidPermission("name can't be empty".to_string()));
        }

        let pattern = if name == "*" {
            Self {
                wildcard: true,
                path: String::new(),
            }
        } else if let Some(prefix) = name.strip_suffix('*').filter(|p| p.ends_with('.')) {
            Self {
                wildcard: true,
                path: prefix.to_string(),
            }
        } else {
            Self {
                wildcard: false,
                path: name.to_string(),
            }
        };

        Ok(pattern)
    }

    pub(crate) fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub(crate) fn implies(&self, other: &NamePattern) -> bool {
        match (self.wildcard, other.wildcard) {
            (true, true) => other.path.starts_with(&self.path),
            // strict: `a.b.` must be followed by at least one more character
            (true, false) => {
                other.path.len() > self.path.len() && other.path.starts_with(&self.path)
            }
            (false, true) => false,
            (false, false) => self.path == other.path,
        }
    }
}

/// A permission identified only by its kind and a hierarchical name.
///
/// Actions are accepted for symmetry with other kinds and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BasicPermission {
    kind: Cow<'static, str>,
    name: String,
    pattern: NamePattern,
}

impl BasicPermission {
    pub fn new(
        kind: impl Into<Cow<'static, str>>,
        name: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(EngineError::InvalidPermission("kind can't be empty".to_string()));
        }
        let name = name.into();
        let pattern = NamePattern::parse(&name)?;
        Ok(Self { kind, name, pattern })
    }

    /// `RuntimePermission` with the given target, e.g. `exitVM`.
    pub fn runtime(name: impl Into<String>) -> Result<Self, EngineError> {
        Self::new(RUNTIME_PERMISSION_KIND, name)
    }

    /// `SecurityPermission` with the given directive, e.g. `insertProvider.SUN`.
    pub fn security(name: impl Into<String>) -> Result<Self, EngineError> {
        Self::new(SECURITY_PERMISSION_KIND, name)
    }

    pub fn is_wildcard(&self) -> bool {
        self.pattern.is_wildcard()
    }

    pub fn into_arc(self) -> Arc<dyn Permission> {
        Arc::new(self)
    }
}

impl Permission for BasicPermission {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn implies(&self, other: &dyn Permission) -> bool {
        match other.downcast_ref::<BasicPermission>() {
            Some(that) => self.kind == that.kind && self.pattern.implies(&that.pattern),
            None => false,
        }
    }

    fn new_collection(&self) -> Option<Box<dyn PermissionCollection>> {
        Some(Box::new(BasicPermissionCollection::new()))
    }

    fn instantiate(&self, name: &str, _actions: &str) -> Result<Arc<dyn Permission>, EngineError> {
        Ok(Arc::new(BasicPermission::new(self.kind.clone(), name)?))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
struct BasicEntries {
    perms: HashMap<String, Arc<dyn Permission>>,
    kind: Option<String>,
    /// Set once a bare `*` has been added.
    all_allowed: bool,
}

/// Homogeneous collection of [`BasicPermission`]s of a single kind.
///
/// Lookup probes the exact name, then each wildcard ancestor from the most
/// specific upwards. A stored `*` is only honoured through the
/// `all_allowed` flag; the climbing loop never builds the bare `*` key.
#[derive(Debug, Default)]
pub struct BasicPermissionCollection {
    entries: RwLock<BasicEntries>,
    read_only: AtomicBool,
}

impl BasicPermissionCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PermissionCollection for BasicPermissionCollection {
    fn add(&self, permission: Arc<dyn Permission>) -> Result<(), EngineError> {
        let mut entries = self.entries.write();
        if self.read_only.load(Ordering::Acquire) {
            return Err(EngineError::ReadOnly {
                collection: "BasicPermissionCollection",
            });
        }

        if permission.downcast_ref::<BasicPermission>().is_none() {
            return Err(EngineError::KindMismatch {
                collection: "BasicPermissionCollection",
                expected: entries.kind.clone().unwrap_or_else(|| "BasicPermission".to_string()),
                found: permission.kind().to_string(),
            });
        }

        match &entries.kind {
            Some(kind) if kind != permission.kind() => {
                return Err(EngineError::KindMismatch {
                    collection: "BasicPermissionCollection",
                    expected: kind.clone(),
                    found: permission.kind().to_string(),
                });
            }
            Some(_) => {}
            None => entries.kind = Some(permission.kind().to_string()),
        }

        if permission.name() == "*" {
            entries.all_allowed = true;
        }
        entries.perms.insert(permission.name().to_string(), permission);
        Ok(())
    }

    fn implies(&self, permission: &dyn Permission) -> bool {
        if permission.downcast_ref::<BasicPermission>().is_none() {
            return false;
        }

        let entries = self.entries.read();
        if entries.kind.as_deref() != Some(permission.kind()) {
            return false;
        }
        if entries.all_allowed {
            return true;
        }

        let name = permission.name();
        if let Some(stored) = entries.perms.get(name) {
            return stored.implies(permission);
        }

        let mut end = name.len();
        while let Some(last) = name[..end].rfind('.') {
            let candidate = format!("{}*", &name[..=last]);
            if let Some(stored) = entries.perms.get(&candidate) {
                return stored.implies(permission);
            }
            end = last;
        }

        false
    }

    fn elements(&self) -> Vec<Arc<dyn Permission>> {
        self.entries.read().perms.values().cloned().collect()
    }

    fn set_read_only(&self) {
        let _entries = self.entries.write();
        self.read_only.store(true, Ordering::Release);
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }
}
