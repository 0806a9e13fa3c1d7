//! Certificate validation hook.
//!
//! rustls does the cryptographic verification. Its verdict is translated into
//! a set of [`PolicyErrors`] and handed to a [`CertificateValidator`], which
//! makes the final accept/reject decision. The same predicate contract is used
//! for server certificates (client side) and client certificates (server side).
//!
//! # Security
//!
//! The default validator, [`AcceptNameMismatch`], accepts a certificate whose
//! chain is trusted even when it was issued for a different name than the one
//! the client asked for. That keeps existing deployments working when clients
//! connect by IP address, but it means a trusted certificate for *any* name is
//! accepted. Use [`RequireValid`] wherever that matters.

use std::{fmt, sync::Arc};

use bitflags::bitflags;
use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, Error, SignatureScheme,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    pki_types::{CertificateDer, ServerName, UnixTime},
    server::danger::{ClientCertVerified, ClientCertVerifier},
};

bitflags! {
    /// Problems found while verifying a peer certificate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PolicyErrors: u8 {
        /// Certificate is not valid for the expected peer identity.
        const NAME_MISMATCH = 0b001;
        /// Chain is untrusted, expired, revoked or otherwise invalid.
        const CHAIN_ERRORS = 0b010;
        /// Peer presented no certificate.
        const NOT_AVAILABLE = 0b100;
    }
}

/// The certificate being judged.
#[derive(Debug, Clone, Copy)]
pub struct PeerCertificate<'a> {
    /// Leaf certificate.
    pub end_entity: &'a CertificateDer<'a>,
    /// Intermediates sent by the peer.
    pub intermediates: &'a [CertificateDer<'a>],
    /// Name the client expected (server certificates only).
    pub expected_name: Option<&'a str>,
}

/// Final say on whether a peer certificate is acceptable.
pub trait CertificateValidator: Send + Sync + 'static {
    /// Return `true` to accept the certificate despite `errors`.
    fn validate(&self, certificate: &PeerCertificate<'_>, errors: PolicyErrors) -> bool;
}

impl<F> CertificateValidator for F
where
    F: Fn(&PeerCertificate<'_>, PolicyErrors) -> bool + Send + Sync + 'static,
{
    fn validate(&self, certificate: &PeerCertificate<'_>, errors: PolicyErrors) -> bool {
        self(certificate, errors)
    }
}

/// Accept a trusted chain even when the name does not match. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptNameMismatch;

impl CertificateValidator for AcceptNameMismatch {
    fn validate(&self, _certificate: &PeerCertificate<'_>, errors: PolicyErrors) -> bool {
        errors.is_empty() || errors == PolicyErrors::NAME_MISMATCH
    }
}

/// Accept only certificates that verified without any error.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireValid;

impl CertificateValidator for RequireValid {
    fn validate(&self, _certificate: &PeerCertificate<'_>, errors: PolicyErrors) -> bool {
        errors.is_empty()
    }
}

/// Map a rustls verification error to policy errors.
///
/// Errors that are not about the certificate itself are returned unchanged so
/// they fail the handshake regardless of the validator.
fn policy_errors(error: Error) -> Result<PolicyErrors, Error> {
    match error {
        Error::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
        ) => Ok(PolicyErrors::NAME_MISMATCH),
        Error::InvalidCertificate(_) | Error::InvalidCertRevocationList(_) => {
            Ok(PolicyErrors::CHAIN_ERRORS)
        },
        Error::NoCertificatesPresented => Ok(PolicyErrors::NOT_AVAILABLE),
        other => Err(other),
    }
}

fn rejected(errors: PolicyErrors) -> Error {
    tracing::debug!(?errors, "peer certificate rejected by validator");
    Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
}

/// Server certificate verifier used by clients: webpki, then the validator.
pub struct ValidatingServerVerifier {
    inner: Arc<WebPkiServerVerifier>,
    validator: Arc<dyn CertificateValidator>,
}

impl ValidatingServerVerifier {
    /// Wrap a webpki verifier.
    pub fn new(inner: Arc<WebPkiServerVerifier>, validator: Arc<dyn CertificateValidator>) -> Self {
        Self { inner, validator }
    }
}

impl fmt::Debug for ValidatingServerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatingServerVerifier").finish_non_exhaustive()
    }
}

impl ServerCertVerifier for ValidatingServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let errors = match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(_) => PolicyErrors::empty(),
            Err(error) => policy_errors(error)?,
        };

        let expected_name = server_name.to_str();
        let certificate = PeerCertificate {
            end_entity,
            intermediates,
            expected_name: Some(expected_name.as_ref()),
        };
        if self.validator.validate(&certificate, errors) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rejected(errors))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Client certificate verifier used by servers that require client
/// certificates: webpki, then the validator.
pub struct ValidatingClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    validator: Arc<dyn CertificateValidator>,
}

impl ValidatingClientVerifier {
    /// Wrap a webpki client verifier.
    pub fn new(
        inner: Arc<dyn ClientCertVerifier>,
        validator: Arc<dyn CertificateValidator>,
    ) -> Self {
        Self { inner, validator }
    }
}

impl fmt::Debug for ValidatingClientVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatingClientVerifier").finish_non_exhaustive()
    }
}

impl ClientCertVerifier for ValidatingClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, Error> {
        let errors = match self.inner.verify_client_cert(end_entity, intermediates, now) {
            Ok(_) => PolicyErrors::empty(),
            Err(error) => policy_errors(error)?,
        };

        let certificate = PeerCertificate { end_entity, intermediates, expected_name: None };
        if self.validator.validate(&certificate, errors) {
            Ok(ClientCertVerified::assertion())
        } else {
            Err(rejected(errors))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
