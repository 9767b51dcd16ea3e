//! Engine types and the service provider interfaces behind them.

use std::fmt;
use std::str::FromStr;

/// A cryptographic service category. Each engine type has its own service
/// provider interface; an implementation registered for one engine type
/// cannot be handed out for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineType {
    MessageDigest,
    Signature,
    KeyPairGenerator,
    KeyFactory,
    AlgorithmParameters,
    AlgorithmParameterGenerator,
    SecureRandom,
    KeyStore,
    CertificateFactory,
    CertPathBuilder,
    CertPathValidator,
    CertStore,
}

impl EngineType {
    pub const ALL: [EngineType; 12] = [
        EngineType::MessageDigest,
        EngineType::Signature,
        EngineType::KeyPairGenerator,
        EngineType::KeyFactory,
        EngineType::AlgorithmParameters,
        EngineType::AlgorithmParameterGenerator,
        EngineType::SecureRandom,
        EngineType::KeyStore,
        EngineType::CertificateFactory,
        EngineType::CertPathBuilder,
        EngineType::CertPathValidator,
        EngineType::CertStore,
    ];

    /// The name used in provider property keys.
    pub fn name(&self) -> &'static str {
        match self {
            EngineType::MessageDigest => "MessageDigest",
            EngineType::Signature => "Signature",
            EngineType::KeyPairGenerator => "KeyPairGenerator",
            EngineType::KeyFactory => "KeyFactory",
            EngineType::AlgorithmParameters => "AlgorithmParameters",
            EngineType::AlgorithmParameterGenerator => "AlgorithmParameterGenerator",
            EngineType::SecureRandom => "SecureRandom",
            EngineType::KeyStore => "KeyStore",
            EngineType::CertificateFactory => "CertificateFactory",
            EngineType::CertPathBuilder => "CertPathBuilder",
            EngineType::CertPathValidator => "CertPathValidator",
            EngineType::CertStore => "CertStore",
        }
    }

    /// Label of the service provider interface implementations must
    /// declare.
    pub fn spi(&self) -> String {
        if self.is_certificate_service() {
            format!("cert.{}Spi", self.name())
        } else {
            format!("{}Spi", self.name())
        }
    }

    /// Whether implementations are built from construction parameters.
    pub fn takes_params(&self) -> bool {
        matches!(self, EngineType::CertStore)
    }

    fn is_certificate_service(&self) -> bool {
        matches!(
            self,
            EngineType::CertificateFactory
                | EngineType::CertPathBuilder
                | EngineType::CertPathValidator
                | EngineType::CertStore
        )
    }
}

impl FromStr for EngineType {
    type Err = ();

    /// Engine type names are matched exactly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EngineType::ALL
            .iter()
            .copied()
            .find(|engine| engine.name() == s)
            .ok_or(())
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
