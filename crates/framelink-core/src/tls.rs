//! Protocol version selection and crypto provider.

use std::{fmt, str::FromStr, sync::Arc};

use rustls::{SupportedProtocolVersion, crypto::CryptoProvider};

static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Which TLS versions a side is willing to negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsProtocol {
    /// TLS 1.2 only.
    Tls12,
    /// TLS 1.3 only.
    Tls13,
    /// Whatever both sides support, preferring TLS 1.3.
    #[default]
    Any,
}

impl TlsProtocol {
    /// rustls protocol versions for this selection.
    pub fn versions(self) -> &'static [&'static SupportedProtocolVersion] {
        match self {
            Self::Tls12 => TLS12_ONLY,
            Self::Tls13 => TLS13_ONLY,
            Self::Any => rustls::ALL_VERSIONS,
        }
    }
}

impl fmt::Display for TlsProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Tls12 => "1.2",
            Self::Tls13 => "1.3",
            Self::Any => "any",
        };
        f.write_str(text)
    }
}

impl FromStr for TlsProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1.2" | "tls1.2" | "tls12" => Ok(Self::Tls12),
            "1.3" | "tls1.3" | "tls13" => Ok(Self::Tls13),
            "any" => Ok(Self::Any),
            other => Err(format!("unknown TLS protocol '{other}' (expected 1.2, 1.3 or any)")),
        }
    }
}

/// Crypto provider used by every framelink TLS configuration.
///
/// Passed explicitly to rustls builders so nothing depends on a process-wide
/// default provider being installed.
pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}
