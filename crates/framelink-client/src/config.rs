//! Client configuration.

use std::{fmt, sync::Arc, time::Duration};

use framelink_core::{
    AcceptNameMismatch, CertificateIdentity, CertificateValidator, ConfigError, TlsProtocol, tls,
    verify::ValidatingServerVerifier,
};
use rustls::{RootCertStore, client::WebPkiServerVerifier, pki_types::CertificateDer};

/// Default time allowed for the server to complete the TLS handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    tls: Arc<rustls::ClientConfig>,
    protocol: TlsProtocol,
    handshake_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Start building a configuration. Trusts the bundled web roots by default.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// rustls configuration handed to every handshake.
    #[must_use]
    pub fn tls_config(&self) -> Arc<rustls::ClientConfig> {
        Arc::clone(&self.tls)
    }

    /// Protocol version selection.
    #[must_use]
    pub fn protocol(&self) -> TlsProtocol {
        self.protocol
    }

    /// Time allowed for the handshake.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Longest gap between two server messages before disconnecting.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("protocol", &self.protocol)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ClientConfig`].
pub struct ClientConfigBuilder {
    web_roots: bool,
    trusted: Vec<CertificateDer<'static>>,
    identity: Option<CertificateIdentity>,
    validator: Arc<dyn CertificateValidator>,
    protocol: TlsProtocol,
    handshake_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            web_roots: true,
            trusted: Vec::new(),
            identity: None,
            validator: Arc::new(AcceptNameMismatch),
            protocol: TlsProtocol::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: None,
        }
    }
}

impl ClientConfigBuilder {
    /// Trust `certificate` in addition to the current anchors.
    #[must_use]
    pub fn trust(mut self, certificate: CertificateDer<'static>) -> Self {
        self.trusted.push(certificate);
        self
    }

    /// Trust exactly `certificates`, dropping the bundled web roots.
    #[must_use]
    pub fn trust_only(mut self, certificates: Vec<CertificateDer<'static>>) -> Self {
        self.web_roots = false;
        self.trusted = certificates;
        self
    }

    /// Present `identity` when the server asks for a client certificate.
    #[must_use]
    pub fn identity(mut self, identity: CertificateIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Predicate deciding on the server certificate.
    ///
    /// Defaults to [`AcceptNameMismatch`], which accepts a trusted certificate
    /// issued for a different name. Pass
    /// [`RequireValid`](framelink_core::RequireValid) to reject it.
    #[must_use]
    pub fn validator(mut self, validator: impl CertificateValidator) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Restrict the negotiable TLS versions.
    #[must_use]
    pub fn protocol(mut self, protocol: TlsProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Time allowed for the server to complete the handshake.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Disconnect when the server sends nothing for `timeout`.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Verifier`] if there are no usable trust anchors
    /// - [`ConfigError::Tls`] if a trusted certificate cannot be parsed
    /// - [`ConfigError::InvalidIdentity`] if the client key does not fit its chain
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let provider = tls::provider();

        let mut roots = RootCertStore::empty();
        if self.web_roots {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        for certificate in self.trusted {
            roots.add(certificate)?;
        }

        let webpki =
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
                .build()?;
        let verifier = ValidatingServerVerifier::new(webpki, self.validator);

        let builder = rustls::ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(self.protocol.versions())?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier));

        let tls = match self.identity {
            None => builder.with_no_client_auth(),
            Some(identity) => {
                let (chain, key) = identity.to_parts();
                builder.with_client_auth_cert(chain, key).map_err(ConfigError::InvalidIdentity)?
            },
        };

        Ok(ClientConfig {
            tls: Arc::new(tls),
            protocol: self.protocol,
            handshake_timeout: self.handshake_timeout,
            idle_timeout: self.idle_timeout,
        })
    }
}
