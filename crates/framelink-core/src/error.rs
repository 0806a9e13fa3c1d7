//! Error types shared by clients and servers.

use std::{io, time::Duration};

use thiserror::Error;

use crate::lifecycle::DisconnectReason;

/// Framing failures, on either the encode or the decode side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Empty messages produce no bytes and cannot be framed.
    #[error("message is empty")]
    EmptyMessage,

    /// A header byte must be followed by at least one payload byte.
    #[error("message of {len} byte(s) is too short to frame")]
    MessageTooShort {
        /// Encoded length
        len: usize,
    },

    /// Message does not fit in header plus payload buffer.
    #[error("message of {len} bytes exceeds the {max} byte frame limit")]
    MessageTooLarge {
        /// Encoded length
        len: usize,
        /// Largest encodable length
        max: usize,
    },

    /// The peer closed the stream.
    #[error("end of stream")]
    EndOfStream,

    /// Received bytes are not UTF-8 text.
    #[error("received message is not valid UTF-8")]
    InvalidUtf8,
}

/// Failures while establishing the secure channel.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// TLS failure: rejected certificate, protocol mismatch, reset during
    /// handshake.
    #[error("TLS handshake failed: {0}")]
    Tls(#[source] io::Error),

    /// Peer did not complete the handshake in time.
    #[error("TLS handshake timed out after {0:?}")]
    TimedOut(Duration),

    /// Expected peer identity is not a valid DNS name or IP address.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
}

/// Failures on an established connection, as seen by a writer.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Connection has already been disconnected.
    #[error("connection is closed")]
    Closed,

    /// Message cannot be framed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The secure channel rejected the write.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// The peer did not take the bytes in time.
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
}

/// Why a read loop stopped.
#[derive(Error, Debug)]
pub enum ReadFailure {
    /// Transport or TLS error.
    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    /// End of stream or undecodable message.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// No message arrived within the idle timeout.
    #[error("no message received for {0:?}")]
    IdleTimeout(Duration),
}

impl ReadFailure {
    /// Reason reported to observers for this failure.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Self::Io(error) => crate::channel::classify_read_error(error),
            Self::Frame(_) | Self::IdleTimeout(_) => DisconnectReason::ConnectionClosed,
        }
    }
}

/// Invalid configuration, detected before any socket is opened.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Certificate or key file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed
        path: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// No certificate found in the supplied PEM.
    #[error("no certificate found in {0}")]
    NoCertificates(String),

    /// No private key found in the supplied PEM.
    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    /// Certificate chain and key do not form a usable identity.
    #[error("invalid certificate identity: {0}")]
    InvalidIdentity(#[source] rustls::Error),

    /// Client certificates are mandatory but no trust anchors were given.
    #[error("client certificates are required but no client trust anchors were configured")]
    NoClientRoots,

    /// Revocation checking is enabled but no revocation lists were given.
    #[error("revocation checking is enabled but no revocation lists were configured")]
    MissingRevocationLists,

    /// A trust anchor or revocation list was rejected.
    #[error("failed to build certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    /// Self-signed certificate generation failed.
    #[error("failed to generate self-signed certificate: {0}")]
    SelfSigned(#[from] rcgen::Error),

    /// Any other rustls configuration error.
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}
