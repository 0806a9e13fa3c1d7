//! Secure channel adapter.
//!
//! Runs the TLS handshake over an already-connected byte stream and keeps only
//! what the engine needs afterwards: the encrypted stream, the peer address,
//! the peer certificate chain and the negotiated protocol version.

use std::{fmt, io, net::SocketAddr, time::Duration};

use rustls::{AlertDescription, ProtocolVersion, pki_types::{CertificateDer, ServerName}};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::{error::HandshakeError, lifecycle::DisconnectReason};

/// Byte stream a [`SecureChannel`] can carry.
pub trait SecureStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> SecureStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased encrypted stream.
pub type BoxedStream = Box<dyn SecureStream>;

/// An established secure channel.
pub struct SecureChannel {
    stream: BoxedStream,
    peer_addr: SocketAddr,
    peer_certificates: Vec<CertificateDer<'static>>,
    protocol_version: Option<ProtocolVersion>,
}

impl SecureChannel {
    /// Server side: complete the handshake on an accepted stream.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::TimedOut`] if the peer does not finish in `timeout`,
    /// [`HandshakeError::Tls`] if the handshake is rejected or the stream fails.
    pub async fn accept<S>(
        acceptor: &TlsAcceptor,
        stream: S,
        peer_addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Self, HandshakeError>
    where
        S: SecureStream,
    {
        let tls = tokio::time::timeout(timeout, acceptor.accept(stream))
            .await
            .map_err(|_| HandshakeError::TimedOut(timeout))?
            .map_err(HandshakeError::Tls)?;

        let (_, session) = tls.get_ref();
        let peer_certificates = session.peer_certificates().map(<[_]>::to_vec).unwrap_or_default();
        let protocol_version = session.protocol_version();

        Ok(Self { stream: Box::new(tls), peer_addr, peer_certificates, protocol_version })
    }

    /// Client side: complete the handshake against `server_name`.
    ///
    /// # Errors
    ///
    /// Same as [`SecureChannel::accept`].
    pub async fn connect<S>(
        connector: &TlsConnector,
        server_name: ServerName<'static>,
        stream: S,
        peer_addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Self, HandshakeError>
    where
        S: SecureStream,
    {
        let tls = tokio::time::timeout(timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| HandshakeError::TimedOut(timeout))?
            .map_err(HandshakeError::Tls)?;

        let (_, session) = tls.get_ref();
        let peer_certificates = session.peer_certificates().map(<[_]>::to_vec).unwrap_or_default();
        let protocol_version = session.protocol_version();

        Ok(Self { stream: Box::new(tls), peer_addr, peer_certificates, protocol_version })
    }

    /// Wrap a stream that is already secure, or a plain stream in tests.
    pub fn from_parts<S>(
        stream: S,
        peer_addr: SocketAddr,
        peer_certificates: Vec<CertificateDer<'static>>,
    ) -> Self
    where
        S: SecureStream,
    {
        Self { stream: Box::new(stream), peer_addr, peer_certificates, protocol_version: None }
    }

    /// Remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Certificate chain the peer presented, leaf first. Empty if none.
    pub fn peer_certificates(&self) -> &[CertificateDer<'static>] {
        &self.peer_certificates
    }

    /// Negotiated TLS version.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.protocol_version
    }

    pub(crate) fn into_parts(
        self,
    ) -> (BoxedStream, SocketAddr, Vec<CertificateDer<'static>>, Option<ProtocolVersion>) {
        (self.stream, self.peer_addr, self.peer_certificates, self.protocol_version)
    }
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("peer_addr", &self.peer_addr)
            .field("peer_certificates", &self.peer_certificates.len())
            .field("protocol_version", &self.protocol_version)
            .finish_non_exhaustive()
    }
}

/// Classify an error raised by a read on an established channel.
///
/// Authentication failures reported after the handshake (TLS 1.3 delivers a
/// rejected client certificate as an alert on the first read) count as
/// [`DisconnectReason::ConnectionFailed`]. Everything else, including resets
/// and truncation, is [`DisconnectReason::ConnectionClosed`].
pub fn classify_read_error(error: &io::Error) -> DisconnectReason {
    let Some(tls_error) = error.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>())
    else {
        return DisconnectReason::ConnectionClosed;
    };

    match tls_error {
        rustls::Error::AlertReceived(alert) if is_authentication_alert(*alert) => {
            DisconnectReason::ConnectionFailed
        },
        rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented => {
            DisconnectReason::ConnectionFailed
        },
        _ => DisconnectReason::ConnectionClosed,
    }
}

fn is_authentication_alert(alert: AlertDescription) -> bool {
    matches!(
        alert,
        AlertDescription::BadCertificate
            | AlertDescription::UnsupportedCertificate
            | AlertDescription::CertificateRevoked
            | AlertDescription::CertificateExpired
            | AlertDescription::CertificateUnknown
            | AlertDescription::UnknownCA
            | AlertDescription::AccessDenied
            | AlertDescription::HandshakeFailure
            | AlertDescription::CertificateRequired
            | AlertDescription::ProtocolVersion
            | AlertDescription::InsufficientSecurity
    )
}
