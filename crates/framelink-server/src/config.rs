//! Server configuration.
//!
//! Built once, validated eagerly: every problem a TLS handshake would trip over
//! later (missing trust anchors, bad key, unusable revocation lists) is
//! reported by [`ServerConfigBuilder::build`] instead.

use std::{fmt, sync::Arc, time::Duration};

use framelink_core::{
    AcceptNameMismatch, CertificateIdentity, CertificateValidator, ConfigError, TlsProtocol, tls,
    verify::ValidatingClientVerifier,
};
use rustls::{
    RootCertStore,
    pki_types::{CertificateDer, CertificateRevocationListDer},
    server::WebPkiClientVerifier,
};

/// Default time allowed for a peer to complete the TLS handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a client gets to take one outgoing message.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    tls: Arc<rustls::ServerConfig>,
    protocol: TlsProtocol,
    client_certificates_required: bool,
    revocation_checked: bool,
    handshake_timeout: Duration,
    idle_timeout: Option<Duration>,
    write_timeout: Duration,
}

impl ServerConfig {
    /// Start building a configuration that presents `identity`.
    pub fn builder(identity: CertificateIdentity) -> ServerConfigBuilder {
        ServerConfigBuilder::new(identity)
    }

    /// rustls configuration handed to every handshake.
    #[must_use]
    pub fn tls(&self) -> Arc<rustls::ServerConfig> {
        Arc::clone(&self.tls)
    }

    /// Protocol version selection.
    #[must_use]
    pub fn protocol(&self) -> TlsProtocol {
        self.protocol
    }

    /// Whether clients must present a certificate.
    #[must_use]
    pub fn client_certificates_required(&self) -> bool {
        self.client_certificates_required
    }

    /// Whether client certificates are checked against revocation lists.
    #[must_use]
    pub fn revocation_checked(&self) -> bool {
        self.revocation_checked
    }

    /// Time allowed for the handshake.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Longest gap between two client messages before disconnecting.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Longest a single write may wait on a client before it is dropped.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("protocol", &self.protocol)
            .field("client_certificates_required", &self.client_certificates_required)
            .field("revocation_checked", &self.revocation_checked)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ServerConfig`].
pub struct ServerConfigBuilder {
    identity: CertificateIdentity,
    client_roots: Option<Vec<CertificateDer<'static>>>,
    revocation_lists: Option<Vec<CertificateRevocationListDer<'static>>>,
    protocol: TlsProtocol,
    validator: Arc<dyn CertificateValidator>,
    handshake_timeout: Duration,
    idle_timeout: Option<Duration>,
    write_timeout: Duration,
}

impl ServerConfigBuilder {
    fn new(identity: CertificateIdentity) -> Self {
        Self {
            identity,
            client_roots: None,
            revocation_lists: None,
            protocol: TlsProtocol::default(),
            validator: Arc::new(AcceptNameMismatch),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Require every client to present a certificate chaining to `roots`.
    #[must_use]
    pub fn require_client_certificates(mut self, roots: Vec<CertificateDer<'static>>) -> Self {
        self.client_roots = Some(roots);
        self
    }

    /// Check client certificates against `crls`.
    ///
    /// Only meaningful together with
    /// [`require_client_certificates`](Self::require_client_certificates).
    /// Certificates whose issuer has no list are accepted.
    #[must_use]
    pub fn check_revocation(mut self, crls: Vec<CertificateRevocationListDer<'static>>) -> Self {
        self.revocation_lists = Some(crls);
        self
    }

    /// Restrict the negotiable TLS versions.
    #[must_use]
    pub fn protocol(mut self, protocol: TlsProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Predicate deciding on client certificates.
    #[must_use]
    pub fn validator(mut self, validator: impl CertificateValidator) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Time allowed for a client to complete the handshake.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Disconnect clients that send nothing for `timeout`.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Disconnect a client that does not take a message within `timeout`.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NoClientRoots`] if client certificates are required
    ///   with an empty root set
    /// - [`ConfigError::MissingRevocationLists`] if revocation checking was
    ///   enabled with no lists
    /// - [`ConfigError::Verifier`] if a root or revocation list is unusable
    /// - [`ConfigError::InvalidIdentity`] if the key does not fit the chain
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        let provider = tls::provider();
        let builder = rustls::ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(self.protocol.versions())?;

        if self.revocation_lists.as_ref().is_some_and(Vec::is_empty) {
            return Err(ConfigError::MissingRevocationLists);
        }

        let client_certificates_required = self.client_roots.is_some();
        let revocation_checked = client_certificates_required && self.revocation_lists.is_some();
        if self.revocation_lists.is_some() && !client_certificates_required {
            tracing::debug!("revocation lists ignored: client certificates are not required");
        }

        let builder = match self.client_roots {
            None => builder.with_no_client_auth(),
            Some(roots) => {
                if roots.is_empty() {
                    return Err(ConfigError::NoClientRoots);
                }

                let mut store = RootCertStore::empty();
                for root in roots {
                    store.add(root)?;
                }

                let mut verifier =
                    WebPkiClientVerifier::builder_with_provider(Arc::new(store), provider);
                if let Some(crls) = self.revocation_lists {
                    verifier = verifier.with_crls(crls).allow_unknown_revocation_status();
                }

                let verifier = ValidatingClientVerifier::new(verifier.build()?, self.validator);
                builder.with_client_cert_verifier(Arc::new(verifier))
            },
        };

        let (chain, key) = self.identity.to_parts();
        let tls = builder.with_single_cert(chain, key).map_err(ConfigError::InvalidIdentity)?;

        Ok(ServerConfig {
            tls: Arc::new(tls),
            protocol: self.protocol,
            client_certificates_required,
            revocation_checked,
            handshake_timeout: self.handshake_timeout,
            idle_timeout: self.idle_timeout,
            write_timeout: self.write_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use framelink_core::RequireValid;
    use rustls::pki_types::PrivateKeyDer;

    use super::*;

    fn identity() -> CertificateIdentity {
        CertificateIdentity::self_signed(vec!["localhost".to_owned()]).unwrap()
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::builder(identity()).build().unwrap();

        assert_eq!(config.protocol(), TlsProtocol::Any);
        assert!(!config.client_certificates_required());
        assert!(!config.revocation_checked());
        assert_eq!(config.handshake_timeout(), DEFAULT_HANDSHAKE_TIMEOUT);
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.write_timeout(), DEFAULT_WRITE_TIMEOUT);
    }

    #[test]
    fn timeouts_are_carried_into_config() {
        let config = ServerConfig::builder(identity())
            .handshake_timeout(Duration::from_secs(3))
            .idle_timeout(Duration::from_secs(60))
            .write_timeout(Duration::from_millis(250))
            .build()
            .unwrap();

        assert_eq!(config.handshake_timeout(), Duration::from_secs(3));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.write_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn client_certificates_need_roots() {
        let err = ServerConfig::builder(identity())
            .require_client_certificates(Vec::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoClientRoots));
    }

    #[test]
    fn revocation_needs_lists() {
        let client = identity();
        let err = ServerConfig::builder(identity())
            .require_client_certificates(client.chain().to_vec())
            .check_revocation(Vec::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRevocationLists));
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let a = identity();
        let b = identity();
        let mixed = CertificateIdentity::from_der(a.chain().to_vec(), b.key().clone_key()).unwrap();

        let err = ServerConfig::builder(mixed).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIdentity(_)));
    }

    #[test]
    fn garbage_key_is_rejected() {
        let a = identity();
        let broken = CertificateIdentity::from_der(
            a.chain().to_vec(),
            PrivateKeyDer::Pkcs8(vec![1, 2, 3].into()),
        )
        .unwrap();

        assert!(ServerConfig::builder(broken).build().is_err());
    }

    #[test]
    fn mutual_tls_config() {
        let client = identity();
        let config = ServerConfig::builder(identity())
            .require_client_certificates(client.chain().to_vec())
            .validator(RequireValid)
            .protocol(TlsProtocol::Tls13)
            .idle_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        assert!(config.client_certificates_required());
        assert_eq!(config.protocol(), TlsProtocol::Tls13);
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(5)));
    }
}
