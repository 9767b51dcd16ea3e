//! Integration tests for the provider registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use warden_engine::{
    AccessController, BasicPermission, PermissionCollection, Permissions, ProtectionDomain,
};
use warden_provider::{
    CacheSizes, EngineType, FactoryError, Instance, Params, Provider, ProviderError,
    ProviderLoader, ProviderRegistry, SecurityProperties,
};

/// What a digest factory hands out: the provider and algorithm it was
/// built for.
#[derive(Debug, PartialEq)]
struct Digest {
    provider: &'static str,
    algorithm: &'static str,
}

fn digest_factory(
    provider: &'static str,
    algorithm: &'static str,
) -> impl Fn(Params<'_>) -> Result<Instance, FactoryError> + Send + Sync + 'static {
    move |_: Params<'_>| -> Result<Instance, FactoryError> {
        Ok(Box::new(Digest { provider, algorithm }))
    }
}

fn sun() -> Arc<Provider> {
    Arc::new(sun_provider())
}

fn sun_provider() -> Provider {
    let provider = Provider::new("SUN", 1.4, "SUN provider");
    provider
        .service(EngineType::MessageDigest, "SHA-1", "sun.SHA", digest_factory("SUN", "SHA-1"))
        .unwrap();
    provider
        .service(EngineType::MessageDigest, "MD5", "sun.MD5", digest_factory("SUN", "MD5"))
        .unwrap();
    provider.alias(EngineType::MessageDigest, "SHA", "SHA-1").unwrap();
    provider.alias(EngineType::MessageDigest, "SHA1", "SHA-1").unwrap();
    provider
        .attribute(EngineType::MessageDigest, "SHA-1", "ImplementedIn", "Software")
        .unwrap();
    provider.put("Signature.SHA1withDSA", "sun.DSA").unwrap();
    provider.put("Signature.SHA1withDSA KeySize", "1024").unwrap();
    provider.put("Alg.Alias.Signature.DSA", "SHA1withDSA").unwrap();
    provider.put("Alg.Class.SHA-1", "sun.SHA").unwrap();
    provider
}

fn acme() -> Arc<Provider> {
    Arc::new(acme_provider())
}

fn acme_provider() -> Provider {
    let provider = Provider::new("ACME", 2.0, "ACME provider");
    provider
        .service(EngineType::MessageDigest, "SHA-1", "acme.Sha1", digest_factory("ACME", "SHA-1"))
        .unwrap();
    provider
        .service(
            EngineType::MessageDigest,
            "SHA-256",
            "acme.Sha256",
            digest_factory("ACME", "SHA-256"),
        )
        .unwrap();
    provider
        .attribute(EngineType::MessageDigest, "SHA-1", "ImplementedIn", "Hardware")
        .unwrap();
    provider.put("Signature.SHA1withDSA", "acme.Dsa").unwrap();
    provider.put("Signature.SHA1withDSA KeySize", "4096").unwrap();
    provider
}

fn registry() -> ProviderRegistry {
    let registry = ProviderRegistry::default();
    registry.add_provider(sun()).unwrap();
    registry.add_provider(acme()).unwrap();
    registry
}

fn names(providers: &[Arc<Provider>]) -> Vec<&str> {
    providers.iter().map(|p| p.name()).collect()
}

fn untrusted() -> Arc<ProtectionDomain> {
    Arc::new(ProtectionDomain::new(None, Some(Arc::new(Permissions::new()))))
}

// =========================================================================
// Resolution
// =========================================================================

#[test]
fn test_priority_order_wins() {
    let registry = registry();
    let implementation = registry.get_impl("SHA-1", "MessageDigest", None).unwrap();
    assert_eq!(implementation.provider().name(), "SUN");
    assert_eq!(
        implementation.downcast_ref::<Digest>(),
        Some(&Digest {
            provider: "SUN",
            algorithm: "SHA-1"
        })
    );

    let implementation = registry.get_impl("SHA-256", "MessageDigest", None).unwrap();
    assert_eq!(implementation.provider().name(), "ACME");
}

#[test]
fn test_alias_and_case_insensitive_resolution() {
    let registry = registry();
    for algorithm in ["SHA", "SHA1", "sha-1"] {
        let entry = registry
            .engine_class_name(algorithm, "MessageDigest", None)
            .unwrap();
        assert_eq!(entry.value, "sun.SHA", "resolving {algorithm}");
    }
}

#[test]
fn test_provider_scoped_lookup() {
    let registry = registry();
    let implementation = registry
        .get_impl("SHA-1", "MessageDigest", Some("ACME"))
        .unwrap();
    assert_eq!(implementation.provider().name(), "ACME");

    assert!(matches!(
        registry.get_impl("MD5", "MessageDigest", Some("ACME")),
        Err(ProviderError::NoSuchAlgorithm { .. })
    ));
    assert!(matches!(
        registry.get_impl("SHA-1", "MessageDigest", Some("NOPE")),
        Err(ProviderError::NoSuchProvider(name)) if name == "NOPE"
    ));
}

#[test]
fn test_unavailable_algorithms() {
    let registry = registry();
    let err = registry.get_impl("whirlpool", "MessageDigest", None).unwrap_err();
    match err {
        ProviderError::NoSuchAlgorithm { algorithm, .. } => assert_eq!(algorithm, "WHIRLPOOL"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(registry.get_impl("", "MessageDigest", None).is_err());
}

#[test]
fn test_missing_class_and_wrong_spi() {
    let registry = registry();
    // the property exists but the class table has no entry for it
    assert!(matches!(
        registry.get_impl("SHA1withDSA", "Signature", None),
        Err(ProviderError::NoSuchAlgorithm { .. })
    ));

    let odd = Provider::new("ODD", 1.0, "");
    odd.service(EngineType::MessageDigest, "X", "odd.X", digest_factory("ODD", "X"))
        .unwrap();
    odd.put("Signature.X", "odd.X").unwrap();
    registry.add_provider(Arc::new(odd)).unwrap();

    let err = registry.get_impl("X", "Signature", None).unwrap_err();
    assert!(err.to_string().contains("not a SignatureSpi"), "{err}");
    assert!(registry.get_impl("X", "Cipher", None).is_err());
}

#[test]
fn test_repeated_resolution_served_from_cache() {
    let registry = registry();
    let first = registry.engine_class_name("SHA", "MessageDigest", None).unwrap();
    assert_eq!(registry.cache_sizes().engines, 1);

    // a later provider mutation is not seen while the entry is cached
    let sun = registry.provider("SUN").unwrap();
    sun.put("MessageDigest.SHA-1", "sun.Replaced").unwrap();

    let second = registry.engine_class_name("SHA", "MessageDigest", None).unwrap();
    assert_eq!(first.value, second.value);
    assert!(Arc::ptr_eq(&first.provider, &second.provider));
    assert_eq!(registry.cache_sizes().engines, 1);
}

// =========================================================================
// Provider list
// =========================================================================

#[test]
fn test_insert_positions() {
    let registry = registry();
    let third = Arc::new(Provider::new("THIRD", 1.0, ""));
    assert_eq!(registry.insert_provider_at(third, 1).unwrap(), Some(1));
    assert_eq!(names(&registry.providers()), vec!["THIRD", "SUN", "ACME"]);

    let late = Arc::new(Provider::new("LATE", 1.0, ""));
    assert_eq!(registry.insert_provider_at(late, 99).unwrap(), Some(4));

    assert_eq!(registry.add_provider(acme()).unwrap(), None);
    assert_eq!(registry.providers().len(), 4);
}

#[test]
fn test_removal_invalidates_caches() {
    let registry = registry();
    assert_eq!(
        registry.get_impl("SHA-1", "MessageDigest", None).unwrap().provider().name(),
        "SUN"
    );
    registry.algorithm_property("SHA-1", "Class");
    registry.providers_with_filter("MessageDigest.SHA-1").unwrap();
    assert_ne!(registry.cache_sizes(), CacheSizes::default());

    registry.remove_provider("SUN").unwrap();
    assert_eq!(registry.cache_sizes(), CacheSizes::default());
    assert_eq!(
        registry.get_impl("SHA-1", "MessageDigest", None).unwrap().provider().name(),
        "ACME"
    );

    // removing an unknown provider is a no-op
    registry.remove_provider("SUN").unwrap();
    assert_eq!(names(&registry.providers()), vec!["ACME"]);
}

#[test]
fn test_list_mutations_require_permission() {
    let registry = registry();
    AccessController::run_as(untrusted(), || {
        let err = registry.add_provider(Arc::new(Provider::new("EVIL", 1.0, ""))).unwrap_err();
        assert!(matches!(err, ProviderError::Security(_)));
        assert!(registry.remove_provider("SUN").is_err());
        assert!(registry.property("keystore.type").is_err());
    });
    assert_eq!(names(&registry.providers()), vec!["SUN", "ACME"]);

    let granted = Permissions::new();
    granted
        .add(BasicPermission::security("removeProvider.ACME").unwrap().into_arc())
        .unwrap();
    let trusted = Arc::new(ProtectionDomain::new(None, Some(Arc::new(granted))));
    AccessController::run_as(trusted, || {
        assert!(registry.remove_provider("ACME").is_ok());
        assert!(registry.remove_provider("SUN").is_err());
    });
    assert_eq!(names(&registry.providers()), vec!["SUN"]);
}

// =========================================================================
// Filters and listings
// =========================================================================

#[test]
fn test_filter_by_algorithm_and_alias() {
    let registry = registry();
    let found = registry.providers_with_filter("MessageDigest.SHA-1").unwrap();
    assert_eq!(names(&found), vec!["SUN", "ACME"]);

    let found = registry.providers_with_filter("messagedigest.sha").unwrap();
    assert_eq!(names(&found), vec!["SUN"]);

    assert!(registry.providers_with_filter("MessageDigest.MD2").unwrap().is_empty());
}

#[test]
fn test_filter_by_attribute() {
    let registry = registry();

    let found = registry.providers_with_filter("Signature.SHA1withDSA KeySize:2048").unwrap();
    assert_eq!(names(&found), vec!["ACME"]);

    let found = registry.providers_with_filter("Signature.DSA KeySize:512").unwrap();
    assert_eq!(names(&found), vec!["SUN"]);

    let found = registry
        .providers_with_filter("MessageDigest.SHA-1 ImplementedIn:hardware")
        .unwrap();
    assert_eq!(names(&found), vec!["ACME"]);
}

#[test]
fn test_filter_intersection() {
    let registry = registry();
    let found = registry
        .providers_with_filters([
            ("MessageDigest.SHA-1", ""),
            ("Signature.SHA1withDSA KeySize", "1024"),
        ])
        .unwrap();
    assert_eq!(names(&found), vec!["SUN", "ACME"]);

    let found = registry
        .providers_with_filters([("MessageDigest.SHA-256", ""), ("MessageDigest.MD5", "")])
        .unwrap();
    assert!(found.is_empty());

    let unfiltered = registry
        .providers_with_filters(std::iter::empty::<(&str, &str)>())
        .unwrap();
    assert_eq!(unfiltered.len(), 2);
}

#[test]
fn test_invalid_filter() {
    let registry = registry();
    assert!(matches!(
        registry.providers_with_filter("MessageDigest"),
        Err(ProviderError::InvalidFilter(_))
    ));
    assert!(matches!(
        registry.providers_with_filter("MessageDigest.SHA-1:Software"),
        Err(ProviderError::InvalidFilter(_))
    ));
}

#[test]
fn test_algorithms_listing() {
    let registry = registry();
    let algorithms: Vec<_> = registry.algorithms("messagedigest").into_iter().collect();
    assert_eq!(algorithms, vec!["MD5", "SHA-1", "SHA-256"]);
    assert!(registry.algorithms("").is_empty());
    assert!(registry.algorithms("MessageDigest.").is_empty());
}

#[test]
fn test_algorithm_property() {
    let registry = registry();
    assert_eq!(registry.algorithm_property("SHA-1", "Class").as_deref(), Some("sun.SHA"));
    assert_eq!(registry.algorithm_property("sha-1", "class").as_deref(), Some("sun.SHA"));
    assert!(registry.algorithm_property("MD5", "Class").is_none());
}

// =========================================================================
// Parameterised factories
// =========================================================================

#[derive(Debug)]
struct StoreParams {
    uri: String,
}

#[derive(Debug)]
struct Store {
    uri: String,
}

fn store_provider() -> Arc<Provider> {
    let provider = Provider::new("STORES", 1.0, "");
    provider
        .service(EngineType::CertStore, "LDAP", "stores.Ldap", |params| {
            let params = params
                .and_then(|p| p.downcast_ref::<StoreParams>())
                .ok_or_else(|| FactoryError::new("LDAP store needs StoreParams"))?;
            Ok(Box::new(Store {
                uri: params.uri.clone(),
            }))
        })
        .unwrap();
    Arc::new(provider)
}

#[test]
fn test_params_passed_to_factory() {
    let registry = ProviderRegistry::default();
    registry.add_provider(store_provider()).unwrap();

    let params = StoreParams {
        uri: "ldap://directory".to_string(),
    };
    let implementation = registry
        .get_impl_with_params("LDAP", "CertStore", None, Some(&params))
        .unwrap();
    assert_eq!(implementation.downcast_ref::<Store>().unwrap().uri, "ldap://directory");

    let err = registry
        .get_impl_with_params("LDAP", "CertStore", None, Some(&42u32))
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidParameter(_)));

    let err = registry.get_impl("LDAP", "CertStore", None).unwrap_err();
    assert!(matches!(err, ProviderError::NoSuchAlgorithm { .. }));
}

// =========================================================================
// Static providers and security properties
// =========================================================================

#[test]
fn test_static_providers_loaded_once_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("security.toml");
    std::fs::write(
        &path,
        r#"
[properties]
"security.provider.1" = "SUN"
"security.provider.2" = "BROKEN"
"security.provider.3" = "ACME"
"security.provider.4" = "SUN"
"keystore.type" = " jks "
"#,
    )
    .unwrap();

    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let loader: Arc<dyn ProviderLoader> = Arc::new(move |name: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
        match name {
            "SUN" => Some(sun_provider()),
            "ACME" => Some(acme_provider()),
            _ => None,
        }
    });

    let properties = SecurityProperties::from_file(&path).unwrap();
    let registry = ProviderRegistry::with_loader(properties, loader);

    assert_eq!(names(&registry.providers()), vec!["SUN", "ACME"]);
    assert_eq!(registry.providers().len(), 2);
    assert_eq!(loads.load(Ordering::SeqCst), 3);
    assert_eq!(registry.property("keystore.type").unwrap().as_deref(), Some("jks"));
}

#[test]
fn test_static_providers_ignored_without_loader() {
    let registry = ProviderRegistry::new(SecurityProperties::default());
    assert!(registry.providers().is_empty());
    assert!(registry.get_impl("SHA-1", "MessageDigest", None).is_err());
}

#[test]
fn test_static_providers_load_under_untrusted_caller() {
    let loader: Arc<dyn ProviderLoader> =
        Arc::new(|name: &str| (name == "SUN").then(sun_provider));
    let registry = ProviderRegistry::with_loader(SecurityProperties::default(), loader);

    AccessController::run_as(untrusted(), || {
        let implementation = registry.get_impl("SHA-1", "MessageDigest", None).unwrap();
        assert_eq!(implementation.provider().name(), "SUN");
    });
    assert_eq!(names(&registry.providers()), vec!["SUN"]);
}

#[test]
fn test_loader_may_reenter_registry() {
    let slot: Arc<Mutex<Option<Arc<ProviderRegistry>>>> = Arc::new(Mutex::new(None));
    let seen = Arc::new(AtomicUsize::new(usize::MAX));
    let (slot_in_loader, seen_in_loader) = (Arc::clone(&slot), Arc::clone(&seen));
    let loader: Arc<dyn ProviderLoader> = Arc::new(move |name: &str| {
        let registry = slot_in_loader.lock().clone()?;
        seen_in_loader.store(registry.providers().len(), Ordering::SeqCst);
        (name == "SUN").then(sun_provider)
    });

    let registry = Arc::new(ProviderRegistry::with_loader(
        SecurityProperties::default(),
        loader,
    ));
    *slot.lock() = Some(Arc::clone(&registry));

    assert_eq!(names(&registry.providers()), vec!["SUN"]);
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[test]
fn test_set_property() {
    let registry = ProviderRegistry::default();
    registry.set_property("policy.provider", "grants").unwrap();
    assert_eq!(registry.property("policy.provider").unwrap().as_deref(), Some("grants"));

    AccessController::run_as(untrusted(), || {
        assert!(registry.set_property("policy.provider", "evil").is_err());
    });
    assert_eq!(registry.property("policy.provider").unwrap().as_deref(), Some("grants"));
}
