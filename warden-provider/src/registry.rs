//! Provider registry: priority-ordered providers and algorithm resolution.
//!
//! The registry resolves `(engine type, algorithm)` to an implementation
//! class by searching installed providers in priority order, then builds an
//! instance through the winning provider's class table. Three caches speed
//! this up; all of them live behind the same lock as the provider list and
//! are cleared in the same critical section as every list mutation.

use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, ReentrantMutex};
use tracing::{debug, info, warn};
use warden_engine::AccessController;

use crate::engine_type::EngineType;
use crate::error::ProviderError;
use crate::properties::SecurityProperties;
use crate::provider::{Instance, Params, Provider};

/// Loads a statically configured provider by the name listed under
/// `security.provider.N`.
///
/// Loaders run as system code, outside the registry lock. A loader that
/// reaches back into the registry sees it without any static providers.
pub trait ProviderLoader: Send + Sync {
    /// Build the provider, or `None` if it cannot be loaded.
    fn load(&self, name: &str) -> Option<Provider>;
}

impl<F> ProviderLoader for F
where
    F: Fn(&str) -> Option<Provider> + Send + Sync,
{
    fn load(&self, name: &str) -> Option<Provider> {
        self(name)
    }
}

/// A resolved property: its value and the provider that supplied it.
#[derive(Debug, Clone)]
pub struct ProviderProperty {
    pub value: String,
    pub provider: Arc<Provider>,
}

/// An implementation instance and the provider it came from.
pub struct Implementation {
    instance: Instance,
    provider: Arc<Provider>,
}

impl Implementation {
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.instance.downcast_ref::<T>()
    }

    pub fn into_parts(self) -> (Instance, Arc<Provider>) {
        (self.instance, self.provider)
    }
}

impl std::fmt::Debug for Implementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Implementation")
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

/// Number of entries in each registry cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheSizes {
    pub properties: usize,
    pub engines: usize,
    pub searches: usize,
}

#[derive(Default)]
struct RegistryState {
    providers: Vec<Arc<Provider>>,
    property_cache: HashMap<String, ProviderProperty>,
    engine_cache: HashMap<String, ProviderProperty>,
    search_cache: HashMap<String, Vec<Arc<Provider>>>,
}

impl RegistryState {
    fn clear_caches(&mut self) {
        self.property_cache.clear();
        self.engine_cache.clear();
        self.search_cache.clear();
    }

    fn position_of(&self, name: &str) -> Option<usize> {
        self.providers.iter().position(|p| p.name() == name)
    }
}

/// One parsed filter criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Criterion {
    service: String,
    algorithm: String,
    attribute: Option<String>,
    value: String,
}

impl Criterion {
    /// Parse `Service.Algorithm` (empty value) or
    /// `Service.Algorithm Attribute` (non-empty value).
    fn parse(key: &str, value: &str) -> Result<Self, ProviderError> {
        let invalid = || ProviderError::InvalidFilter(key.to_string());

        let dot = key.find('.').ok_or_else(invalid)?;
        let service = &key[..dot];

        if value.is_empty() {
            let algorithm = key[dot + 1..].trim();
            if algorithm.is_empty() {
                return Err(invalid());
            }
            return Ok(Self {
                service: service.to_string(),
                algorithm: algorithm.to_string(),
                attribute: None,
                value: String::new(),
            });
        }

        let space = key.find(' ').ok_or_else(invalid)?;
        let attribute = key[space + 1..].trim();
        if attribute.is_empty() || space <= dot + 1 {
            return Err(invalid());
        }

        Ok(Self {
            service: service.to_string(),
            algorithm: key[dot + 1..space].to_string(),
            attribute: Some(attribute.to_string()),
            value: value.to_string(),
        })
    }

    fn cache_key(&self) -> String {
        format!("{}.{}", self.service, self.algorithm)
    }

    fn satisfied_by(&self, provider: &Provider) -> bool {
        let suffix = match &self.attribute {
            Some(attribute) => format!(" {attribute}"),
            None => String::new(),
        };

        let direct = format!("{}.{}{suffix}", self.service, self.algorithm);
        let found = provider_property(provider, &direct).or_else(|| {
            let alias = format!("Alg.Alias.{}.{}", self.service, self.algorithm);
            let standard = provider_property(provider, &alias)?;
            provider_property(provider, &format!("{}.{standard}{suffix}", self.service))
        });
        let Some(declared) = found else {
            return false;
        };

        match &self.attribute {
            None => true,
            Some(attribute) if attribute.eq_ignore_ascii_case("KeySize") => {
                match (self.value.trim().parse::<u64>(), declared.trim().parse::<u64>()) {
                    (Ok(requested), Ok(max)) => requested <= max,
                    _ => false,
                }
            }
            Some(_) => self.value.eq_ignore_ascii_case(&declared),
        }
    }

    /// Providers offering the service and algorithm, before attribute
    /// filtering.
    fn base(&self) -> Criterion {
        Criterion {
            attribute: None,
            value: String::new(),
            ..self.clone()
        }
    }
}

/// The value of `key` in `provider`, exact or case-insensitive.
fn provider_property(provider: &Provider, key: &str) -> Option<String> {
    provider.lookup(key).map(|(_, value)| value)
}

/// Resolve `algorithm` for `engine_type` within one provider: the direct
/// entry, then the entry of the standard name the alias points to.
fn class_name_in(provider: &Provider, algorithm: &str, engine_type: &str) -> Option<String> {
    provider_property(provider, &format!("{engine_type}.{algorithm}")).or_else(|| {
        let standard =
            provider_property(provider, &format!("Alg.Alias.{engine_type}.{algorithm}"))?;
        provider_property(provider, &format!("{engine_type}.{standard}"))
    })
}

/// Registry of installed providers.
///
/// Statically configured providers (`security.provider.N`) are loaded
/// through the [`ProviderLoader`] on first access. Installing and removing
/// providers and reading or writing security properties are guarded by
/// `SecurityPermission` directives checked against the current call
/// context.
pub struct ProviderRegistry {
    state: Mutex<RegistryState>,
    properties: SecurityProperties,
    loader: Option<Arc<dyn ProviderLoader>>,
    statics_loaded: AtomicBool,
    // held while static providers load; the flag marks a load in progress
    static_load: ReentrantMutex<Cell<bool>>,
}

impl ProviderRegistry {
    /// Create a registry without a loader; static provider entries are
    /// ignored.
    pub fn new(properties: SecurityProperties) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            properties,
            loader: None,
            statics_loaded: AtomicBool::new(false),
            static_load: ReentrantMutex::new(Cell::new(false)),
        }
    }

    /// Create a registry that loads static providers with `loader`.
    pub fn with_loader(properties: SecurityProperties, loader: Arc<dyn ProviderLoader>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            properties,
            loader: Some(loader),
            statics_loaded: AtomicBool::new(false),
            static_load: ReentrantMutex::new(Cell::new(false)),
        }
    }

    /// Lock the state, loading static providers the first time.
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.ensure_static_providers();
        self.state.lock()
    }

    fn ensure_static_providers(&self) {
        if self.statics_loaded.load(Ordering::Acquire) {
            return;
        }
        let loading = self.static_load.lock();
        if loading.get() || self.statics_loaded.load(Ordering::Acquire) {
            return;
        }

        loading.set(true);
        let loaded = self.load_static_providers();
        {
            let mut state = self.state.lock();
            for (name, provider) in loaded {
                if state.position_of(provider.name()).is_some() {
                    warn!(
                        name = %name,
                        provider = %provider.name(),
                        "static provider already installed"
                    );
                    continue;
                }
                info!(name = %name, provider = %provider, "loaded static provider");
                state.providers.push(Arc::new(provider));
            }
            state.clear_caches();
        }
        self.statics_loaded.store(true, Ordering::Release);
        loading.set(false);
    }

    fn load_static_providers(&self) -> Vec<(String, Provider)> {
        let names = self.properties.static_providers();
        if names.is_empty() {
            return Vec::new();
        }
        let Some(loader) = &self.loader else {
            warn!(count = names.len(), "no provider loader, static providers skipped");
            return Vec::new();
        };

        let mut loaded = Vec::with_capacity(names.len());
        for name in names {
            match AccessController::as_system(|| loader.load(&name)) {
                Some(provider) => loaded.push((name, provider)),
                None => warn!(name = %name, "failed to load static provider"),
            }
        }
        loaded
    }

    // =========================================================================
    // Provider list
    // =========================================================================

    /// Install `provider` at 1-based `position`.
    ///
    /// Positions outside `1..=len` append. Returns the position used, or
    /// `None` if a provider with the same name is already installed.
    pub fn insert_provider_at(
        &self,
        provider: Arc<Provider>,
        position: usize,
    ) -> Result<Option<usize>, ProviderError> {
        AccessController::check_security_access(&format!("insertProvider.{}", provider.name()))?;

        let mut state = self.state();
        if state.position_of(provider.name()).is_some() {
            debug!(provider = %provider.name(), "provider already installed");
            return Ok(None);
        }

        let size = state.providers.len();
        let position = if position == 0 || position > size {
            size + 1
        } else {
            position
        };
        info!(provider = %provider, position, "installing provider");
        state.providers.insert(position - 1, provider);
        state.clear_caches();
        Ok(Some(position))
    }

    /// Install `provider` after all installed providers.
    pub fn add_provider(&self, provider: Arc<Provider>) -> Result<Option<usize>, ProviderError> {
        self.insert_provider_at(provider, 0)
    }

    /// Remove the provider named `name`. Does nothing if it is not
    /// installed.
    pub fn remove_provider(&self, name: &str) -> Result<(), ProviderError> {
        AccessController::check_security_access(&format!("removeProvider.{name}"))?;

        let mut state = self.state();
        if let Some(index) = state.position_of(name) {
            state.providers.remove(index);
            state.clear_caches();
            info!(provider = %name, "removed provider");
        }
        Ok(())
    }

    /// Installed providers in priority order.
    pub fn providers(&self) -> Vec<Arc<Provider>> {
        self.state().providers.clone()
    }

    pub fn provider(&self, name: &str) -> Option<Arc<Provider>> {
        let state = self.state();
        state.position_of(name).map(|i| Arc::clone(&state.providers[i]))
    }

    pub fn cache_sizes(&self) -> CacheSizes {
        let state = self.state.lock();
        CacheSizes {
            properties: state.property_cache.len(),
            engines: state.engine_cache.len(),
            searches: state.search_cache.len(),
        }
    }

    // =========================================================================
    // Security properties
    // =========================================================================

    /// Read a security property. Requires `getProperty.<key>`.
    pub fn property(&self, key: &str) -> Result<Option<String>, ProviderError> {
        AccessController::check_security_access(&format!("getProperty.{key}"))?;
        Ok(self.properties.get(key))
    }

    /// Write a security property. Requires `setProperty.<key>`.
    pub fn set_property(&self, key: &str, value: &str) -> Result<(), ProviderError> {
        AccessController::check_security_access(&format!("setProperty.{key}"))?;
        self.properties.set(key, value);
        Ok(())
    }

    // =========================================================================
    // Property lookup
    // =========================================================================

    /// The first provider property named `key`, in priority order.
    fn cached_property(&self, key: &str) -> Option<ProviderProperty> {
        let mut state = self.state();
        if let Some(hit) = state.property_cache.get(key) {
            debug!(key = %key, "property cache hit");
            return Some(hit.clone());
        }

        let found = state.providers.iter().find_map(|provider| {
            provider.lookup(key).map(|(stored, value)| {
                (
                    stored,
                    ProviderProperty {
                        value,
                        provider: Arc::clone(provider),
                    },
                )
            })
        });

        let (stored, entry) = found?;
        if stored != key {
            state.property_cache.insert(stored, entry.clone());
        }
        state.property_cache.insert(key.to_string(), entry.clone());
        Some(entry)
    }

    /// The `Alg.<property>.<algorithm>` value of the first provider that
    /// defines it.
    pub fn algorithm_property(&self, algorithm: &str, property: &str) -> Option<String> {
        self.cached_property(&format!("Alg.{property}.{algorithm}"))
            .map(|entry| entry.value)
    }

    /// Upper-cased names of the algorithms offered for `service` by any
    /// provider. Attribute entries are skipped.
    pub fn algorithms(&self, service: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        if service.is_empty() || service.ends_with('.') {
            return result;
        }

        let prefix = format!("{}.", service.to_uppercase());
        for provider in self.providers() {
            for key in provider.keys() {
                let key = key.to_uppercase();
                if key.contains(' ') {
                    continue;
                }
                if let Some(algorithm) = key.strip_prefix(&prefix) {
                    result.insert(algorithm.to_string());
                }
            }
        }
        result
    }

    // =========================================================================
    // Engine resolution
    // =========================================================================

    /// Resolve the implementation class for `algorithm`, searching every
    /// provider or only `provider` when named.
    pub fn engine_class_name(
        &self,
        algorithm: &str,
        engine_type: &str,
        provider: Option<&str>,
    ) -> Result<ProviderProperty, ProviderError> {
        if algorithm.is_empty() {
            return Err(ProviderError::no_such_algorithm(
                algorithm,
                engine_type,
                "empty algorithm name",
            ));
        }

        match provider {
            Some(name) => {
                let provider = self
                    .provider(name)
                    .ok_or_else(|| ProviderError::NoSuchProvider(name.to_string()))?;
                Self::class_name_from(&provider, algorithm, engine_type)
            }
            None => self.class_name_from_any(algorithm, engine_type),
        }
    }

    fn class_name_from(
        provider: &Arc<Provider>,
        algorithm: &str,
        engine_type: &str,
    ) -> Result<ProviderProperty, ProviderError> {
        match class_name_in(provider, algorithm, engine_type) {
            Some(value) => Ok(ProviderProperty {
                value,
                provider: Arc::clone(provider),
            }),
            None => Err(ProviderError::no_such_algorithm(
                algorithm,
                engine_type,
                format!("not offered by provider {}", provider.name()),
            )),
        }
    }

    fn class_name_from_any(
        &self,
        algorithm: &str,
        engine_type: &str,
    ) -> Result<ProviderProperty, ProviderError> {
        let key = format!("{engine_type}.{algorithm}");
        let mut state = self.state();
        if let Some(hit) = state.engine_cache.get(&key) {
            debug!(key = %key, provider = %hit.provider.name(), "engine cache hit");
            return Ok(hit.clone());
        }

        debug!(key = %key, providers = state.providers.len(), "engine cache miss");
        let found = state.providers.iter().find_map(|provider| {
            class_name_in(provider, algorithm, engine_type).map(|value| ProviderProperty {
                value,
                provider: Arc::clone(provider),
            })
        });

        match found {
            Some(entry) => {
                state.engine_cache.insert(key, entry.clone());
                Ok(entry)
            }
            None => Err(ProviderError::no_such_algorithm(
                &algorithm.to_uppercase(),
                engine_type,
                "no installed provider offers it",
            )),
        }
    }

    /// Build an implementation of `algorithm` for `engine_type`.
    pub fn get_impl(
        &self,
        algorithm: &str,
        engine_type: &str,
        provider: Option<&str>,
    ) -> Result<Implementation, ProviderError> {
        let entry = self.engine_class_name(algorithm, engine_type, provider)?;
        match Self::instantiate(algorithm, engine_type, entry, None) {
            Err(ProviderError::InvalidParameter(reason)) => Err(
                ProviderError::no_such_algorithm(algorithm, engine_type, reason),
            ),
            other => other,
        }
    }

    /// Build an implementation from construction parameters.
    pub fn get_impl_with_params(
        &self,
        algorithm: &str,
        engine_type: &str,
        provider: Option<&str>,
        params: Params<'_>,
    ) -> Result<Implementation, ProviderError> {
        let entry = self.engine_class_name(algorithm, engine_type, provider)?;
        Self::instantiate(algorithm, engine_type, entry, params)
    }

    fn instantiate(
        algorithm: &str,
        engine_type: &str,
        entry: ProviderProperty,
        params: Params<'_>,
    ) -> Result<Implementation, ProviderError> {
        let ProviderProperty {
            value: class_name,
            provider,
        } = entry;
        let unavailable =
            |reason: String| ProviderError::no_such_algorithm(algorithm, engine_type, reason);

        let engine: EngineType = engine_type
            .parse()
            .map_err(|_| unavailable(format!("no service provider interface for {engine_type}")))?;

        let class = provider.load_class(&class_name).ok_or_else(|| {
            unavailable(format!(
                "class {class_name} configured for {engine} (provider: {}) cannot be found",
                provider.name()
            ))
        })?;

        if class.engine() != engine {
            return Err(unavailable(format!(
                "class configured for {engine}: {class_name} not a {}",
                engine.spi()
            )));
        }

        let instance = if engine.takes_params() {
            class.instantiate(params).map_err(|e| {
                ProviderError::InvalidParameter(format!(
                    "class {class_name} configured for {engine} (provider: {}): {e}",
                    provider.name()
                ))
            })?
        } else {
            class.instantiate(None).map_err(|e| {
                unavailable(format!(
                    "class {class_name} configured for {engine} (provider: {}) \
                     cannot be instantiated: {e}",
                    provider.name()
                ))
            })?
        };

        debug!(
            algorithm = %algorithm,
            engine = %engine,
            provider = %provider.name(),
            "instantiated implementation"
        );
        Ok(Implementation { instance, provider })
    }

    // =========================================================================
    // Filtered search
    // =========================================================================

    /// Providers satisfying `filter`, in priority order.
    ///
    /// The filter is `Service.Algorithm` or
    /// `Service.Algorithm Attribute:value`.
    pub fn providers_with_filter(&self, filter: &str) -> Result<Vec<Arc<Provider>>, ProviderError> {
        let (key, value) = match filter.split_once(':') {
            Some((key, value)) => (key, value),
            None => (filter, ""),
        };
        self.providers_with_filters([(key, value)])
    }

    /// Providers satisfying every criterion, in priority order.
    pub fn providers_with_filters<'a>(
        &self,
        criteria: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Vec<Arc<Provider>>, ProviderError> {
        let criteria = criteria
            .into_iter()
            .map(|(key, value)| Criterion::parse(key, value))
            .collect::<Result<Vec<_>, _>>()?;

        let mut candidates: Option<Vec<Arc<Provider>>> = None;
        for criterion in &criteria {
            let qualifying = self.qualifying(criterion);
            if qualifying.is_empty() {
                return Ok(Vec::new());
            }
            candidates = Some(match candidates {
                None => qualifying,
                Some(current) => current
                    .into_iter()
                    .filter(|p| qualifying.iter().any(|q| Arc::ptr_eq(p, q)))
                    .collect(),
            });
        }

        match candidates {
            Some(candidates) => Ok(candidates),
            None => Ok(self.providers()),
        }
    }

    fn qualifying(&self, criterion: &Criterion) -> Vec<Arc<Provider>> {
        let cache_key = criterion.cache_key();
        let base = {
            let mut state = self.state();
            match state.search_cache.get(&cache_key) {
                Some(hit) => {
                    debug!(key = %cache_key, "search cache hit");
                    hit.clone()
                }
                None => {
                    let base = criterion.base();
                    let found: Vec<_> = state
                        .providers
                        .iter()
                        .filter(|p| base.satisfied_by(p))
                        .cloned()
                        .collect();
                    if !found.is_empty() {
                        state.search_cache.insert(cache_key, found.clone());
                    }
                    found
                }
            }
        };

        match &criterion.attribute {
            None => base,
            Some(_) => base.into_iter().filter(|p| criterion.satisfied_by(p)).collect(),
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(SecurityProperties::empty())
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        let names: Vec<&str> = state.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .field("statics_loaded", &self.statics_loaded.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
