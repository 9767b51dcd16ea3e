//! Cryptographic service providers.
//!
//! A [`Provider`] is a named property bag describing the algorithms it
//! offers, plus a class table holding the factories those properties name.
//!
//! Property keys follow three shapes:
//! - `Engine.Algorithm` maps to an implementation class name
//! - `Alg.Alias.Engine.Alias` maps an alias to a standard algorithm name
//! - `Engine.Algorithm Attribute` holds an attribute value (e.g. `KeySize`)

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use warden_engine::AccessController;

use crate::engine_type::EngineType;
use crate::error::{FactoryError, ProviderError};

/// An implementation instance handed out by a factory.
pub type Instance = Box<dyn Any + Send + Sync>;

/// Construction parameters passed to factories of parameterised engine
/// types.
pub type Params<'a> = Option<&'a (dyn Any + Send + Sync)>;

type Factory = dyn Fn(Params<'_>) -> Result<Instance, FactoryError> + Send + Sync;

/// An entry of a provider's class table: the engine type the class
/// implements and how to build it.
#[derive(Clone)]
pub struct ServiceClass {
    engine: EngineType,
    factory: Arc<Factory>,
}

impl ServiceClass {
    pub fn new<F>(engine: EngineType, factory: F) -> Self
    where
        F: Fn(Params<'_>) -> Result<Instance, FactoryError> + Send + Sync + 'static,
    {
        Self {
            engine,
            factory: Arc::new(factory),
        }
    }

    /// The engine type this class implements.
    pub fn engine(&self) -> EngineType {
        self.engine
    }

    pub fn instantiate(&self, params: Params<'_>) -> Result<Instance, FactoryError> {
        (self.factory)(params)
    }
}

impl fmt::Debug for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClass")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// A named set of algorithm implementations.
///
/// Property mutations require `SecurityPermission` with the directive
/// `putProviderProperty.<name>`, `removeProviderProperty.<name>` or
/// `clearProviderProperties.<name>`. A sealed provider rejects all
/// mutations.
pub struct Provider {
    name: String,
    version: f64,
    info: String,
    properties: RwLock<BTreeMap<String, String>>,
    classes: RwLock<HashMap<String, ServiceClass>>,
    sealed: AtomicBool,
}

impl Provider {
    /// Create a provider. The legacy `Provider.id *` properties are set
    /// from the name, version and info.
    pub fn new(name: impl Into<String>, version: f64, info: impl Into<String>) -> Self {
        let provider = Self {
            name: name.into(),
            version,
            info: info.into(),
            properties: RwLock::new(BTreeMap::new()),
            classes: RwLock::new(HashMap::new()),
            sealed: AtomicBool::new(false),
        };
        provider.put_id(&mut provider.properties.write());
        provider
    }

    fn put_id(&self, properties: &mut BTreeMap<String, String>) {
        properties.insert("Provider.id name".to_string(), self.name.clone());
        properties.insert("Provider.id version".to_string(), self.version.to_string());
        properties.insert("Provider.id info".to_string(), self.info.clone());
        properties.insert("Provider.id className".to_string(), self.name.clone());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> f64 {
        self.version
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// The property stored under exactly `key`.
    pub fn property(&self, key: &str) -> Option<String> {
        self.properties.read().get(key).cloned()
    }

    /// The property stored under `key`, falling back to a case-insensitive
    /// match. Returns the key as stored along with the value.
    pub fn lookup(&self, key: &str) -> Option<(String, String)> {
        let properties = self.properties.read();
        if let Some(value) = properties.get(key) {
            return Some((key.to_string(), value.clone()));
        }
        properties
            .iter()
            .find(|(stored, _)| stored.eq_ignore_ascii_case(key))
            .map(|(stored, value)| (stored.clone(), value.clone()))
    }

    /// All property keys.
    pub fn keys(&self) -> Vec<String> {
        self.properties.read().keys().cloned().collect()
    }

    pub fn put(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Option<String>, ProviderError> {
        self.check_mutation("putProviderProperty")?;
        let key = key.into();
        let value = value.into();
        let mut properties = self.properties.write();
        self.ensure_writable()?;
        debug!(provider = %self.name, key = %key, "put provider property");
        Ok(properties.insert(key, value))
    }

    pub fn remove(&self, key: &str) -> Result<Option<String>, ProviderError> {
        self.check_mutation("removeProviderProperty")?;
        let mut properties = self.properties.write();
        self.ensure_writable()?;
        debug!(provider = %self.name, key = %key, "remove provider property");
        Ok(properties.remove(key))
    }

    /// Remove every property except the `Provider.id *` entries.
    pub fn clear(&self) -> Result<(), ProviderError> {
        self.check_mutation("clearProviderProperties")?;
        let mut properties = self.properties.write();
        self.ensure_writable()?;
        properties.clear();
        self.put_id(&mut properties);
        Ok(())
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Offer `algorithm` for `engine`, implemented by `class_name`.
    pub fn service<F>(
        &self,
        engine: EngineType,
        algorithm: &str,
        class_name: &str,
        factory: F,
    ) -> Result<(), ProviderError>
    where
        F: Fn(Params<'_>) -> Result<Instance, FactoryError> + Send + Sync + 'static,
    {
        self.register_class(class_name, ServiceClass::new(engine, factory))?;
        self.put(format!("{engine}.{algorithm}"), class_name)?;
        Ok(())
    }

    /// Make `alias` another name for the standard `algorithm`.
    pub fn alias(
        &self,
        engine: EngineType,
        alias: &str,
        algorithm: &str,
    ) -> Result<(), ProviderError> {
        self.put(format!("Alg.Alias.{engine}.{alias}"), algorithm)?;
        Ok(())
    }

    /// Describe an attribute of an offered algorithm.
    pub fn attribute(
        &self,
        engine: EngineType,
        algorithm: &str,
        attribute: &str,
        value: &str,
    ) -> Result<(), ProviderError> {
        self.put(format!("{engine}.{algorithm} {attribute}"), value)?;
        Ok(())
    }

    /// Add a class to the class table.
    pub fn register_class(
        &self,
        class_name: &str,
        class: ServiceClass,
    ) -> Result<(), ProviderError> {
        let mut classes = self.classes.write();
        self.ensure_writable()?;
        classes.insert(class_name.to_string(), class);
        Ok(())
    }

    /// Look a class up in the class table.
    pub fn load_class(&self, class_name: &str) -> Option<ServiceClass> {
        self.classes.read().get(class_name).cloned()
    }

    // =========================================================================
    // Sealing
    // =========================================================================

    pub fn seal(&self) {
        let _properties = self.properties.write();
        let _classes = self.classes.write();
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    fn ensure_writable(&self) -> Result<(), ProviderError> {
        if self.is_sealed() {
            return Err(ProviderError::ReadOnly {
                provider: self.name.clone(),
            });
        }
        Ok(())
    }

    fn check_mutation(&self, action: &str) -> Result<(), ProviderError> {
        AccessController::check_security_access(&format!("{action}.{}", self.name))?;
        Ok(())
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("sealed", &self.is_sealed())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} version {}", self.name, self.version)
    }
}
