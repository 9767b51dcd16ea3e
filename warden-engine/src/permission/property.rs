//! Read/write access to named configuration properties.

use std::any::Any;
use std::sync::Arc;

use super::basic::NamePattern;
use super::Permission;
use crate::error::EngineError;

pub const PROPERTY_PERMISSION_KIND: &str = "PropertyPermission";

const READ: u8 = 0b01;
const WRITE: u8 = 0b10;

/// Access to a property name (hierarchical, like [`super::BasicPermission`])
/// with a `read` / `write` action set.
///
/// Uses the default [`super::PermissionsHash`] collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPermission {
    name: String,
    pattern: NamePattern,
    mask: u8,
    actions: String,
}

impl PropertyPermission {
    pub fn new(name: impl Into<String>, actions: &str) -> Result<Self, EngineError> {
        let name = name.into();
        let pattern = NamePattern::parse(&name)?;
        let mask = parse_actions(actions)?;
        Ok(Self {
            name,
            pattern,
            mask,
            actions: canonical_actions(mask).to_string(),
        })
    }

    pub fn into_arc(self) -> Arc<dyn Permission> {
        Arc::new(self)
    }
}

fn parse_actions(actions: &str) -> Result<u8, EngineError> {
    let mut mask = 0;
    for action in actions.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        mask |= match action.to_ascii_lowercase().as_str() {
            "read" => READ,
            "write" => WRITE,
            other => {
                return Err(EngineError::InvalidPermission(format!(
                    "invalid property action '{other}'"
                )))
            }
        };
    }
    if mask == 0 {
        return Err(EngineError::InvalidPermission(
            "property permission needs at least one action".to_string(),
        ));
    }
    Ok(mask)
}

fn canonical_actions(mask: u8) -> &'static str {
    match mask {
        READ => "read",
        WRITE => "write",
        _ => "read,write",
    }
}

impl Permission for PropertyPermission {
    fn kind(&self) -> &str {
        PROPERTY_PERMISSION_KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn actions(&self) -> &str {
        &self.actions
    }

    fn implies(&self, other: &dyn Permission) -> bool {
        match other.downcast_ref::<PropertyPermission>() {
            Some(that) => {
                (self.mask & that.mask) == that.mask && self.pattern.implies(&that.pattern)
            }
            None => false,
        }
    }

    fn instantiate(&self, name: &str, actions: &str) -> Result<Arc<dyn Permission>, EngineError> {
        Ok(Arc::new(PropertyPermission::new(name, actions)?))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
