//! Error types for provider lookup.

use thiserror::Error;
use warden_engine::EngineError;

/// Errors from the provider registry and providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// No installed provider offers the algorithm, or its implementation
    /// could not be instantiated.
    #[error("{algorithm} {engine_type} not available: {reason}")]
    NoSuchAlgorithm {
        algorithm: String,
        engine_type: String,
        reason: String,
    },

    /// A provider was requested by name but is not installed.
    #[error("no such provider: {0}")]
    NoSuchProvider(String),

    /// A provider filter is not `Service.Algorithm` or
    /// `Service.Algorithm Attribute` with a value.
    #[error("invalid filter: '{0}'")]
    InvalidFilter(String),

    /// An implementation rejected its construction parameters.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Attempt to mutate a sealed provider.
    #[error("provider {provider} is read-only")]
    ReadOnly { provider: String },

    /// The current context lacks the required security permission.
    #[error(transparent)]
    Security(#[from] EngineError),

    #[error("failed to read security properties: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse security properties: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ProviderError {
    pub(crate) fn no_such_algorithm(
        algorithm: &str,
        engine_type: &str,
        reason: impl Into<String>,
    ) -> Self {
        ProviderError::NoSuchAlgorithm {
            algorithm: algorithm.to_string(),
            engine_type: engine_type.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by an implementation factory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct FactoryError(pub String);

impl FactoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
