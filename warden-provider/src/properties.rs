//! Security properties: the process-wide `key -> string` configuration
//! store.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::warn;

use crate::error::ProviderError;

/// Key prefix of the statically configured provider list.
pub const PROVIDER_PREFIX: &str = "security.provider.";

/// Entry installed when no properties file is loaded.
pub const DEFAULT_PROVIDER: &str = "SUN";

#[derive(Debug, Deserialize)]
struct PropertiesFile {
    #[serde(default)]
    properties: HashMap<String, String>,
}

/// Security properties such as `security.provider.N`, `policy.provider` or
/// `keystore.type`.
///
/// This store performs no permission checks; the registry guards access
/// with `getProperty.<key>` and `setProperty.<key>`.
#[derive(Debug)]
pub struct SecurityProperties {
    values: RwLock<BTreeMap<String, String>>,
}

impl SecurityProperties {
    /// An empty store.
    pub fn empty() -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn from_map(values: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            values: RwLock::new(values.into_iter().collect()),
        }
    }

    /// Parse the `[properties]` table of a TOML document.
    ///
    /// ```toml
    /// [properties]
    /// "security.provider.1" = "SUN"
    /// "keystore.type" = "jks"
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, ProviderError> {
        let file: PropertiesFile = toml::from_str(content)?;
        Ok(Self::from_map(file.properties))
    }

    pub fn from_file(path: &Path) -> Result<Self, ProviderError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// The value for `key`, trimmed.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).map(|v| v.trim().to_string())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// The statically configured providers, in priority order.
    ///
    /// Reads `security.provider.1`, `security.provider.2`, ... until an
    /// entry is missing or blank. Repeated entries are listed once.
    pub fn static_providers(&self) -> Vec<String> {
        let values = self.values.read();
        let mut names: Vec<String> = Vec::new();
        for i in 1.. {
            let key = format!("{PROVIDER_PREFIX}{i}");
            let Some(name) = values.get(&key) else {
                break;
            };
            let name = name.trim();
            if name.is_empty() {
                warn!(key = %key, "invalid entry for static provider");
                break;
            }
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}

impl Default for SecurityProperties {
    /// A store holding only `security.provider.1 = "SUN"`.
    fn default() -> Self {
        Self::from_map([(format!("{PROVIDER_PREFIX}1"), DEFAULT_PROVIDER.to_string())])
    }
}
