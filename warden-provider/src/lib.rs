//! # Warden Provider
//!
//! Cryptographic service provider registry for the Warden security system.
//!
//! This crate provides:
//! - `Provider` property bags with per-provider factory class tables
//! - `ProviderRegistry` that resolves algorithm names to implementations in
//!   provider priority order, with alias resolution, attribute-filtered
//!   search and three caches
//! - `SecurityProperties`, the `key -> string` security configuration store

mod engine_type;
mod error;
mod properties;
mod provider;
mod registry;

pub use engine_type::EngineType;
pub use error::{FactoryError, ProviderError};
pub use properties::{SecurityProperties, DEFAULT_PROVIDER, PROVIDER_PREFIX};
pub use provider::{Instance, Params, Provider, ServiceClass};
pub use registry::{CacheSizes, Implementation, ProviderLoader, ProviderProperty, ProviderRegistry};
