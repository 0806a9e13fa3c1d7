//! framelink core logic
//!
//! Everything a framelink client and server have in common: the framing state
//! machine, the secure channel adapter, the connection handle with its read
//! loop, lifecycle bookkeeping, and the observer plumbing used to deliver
//! events to application code.
//!
//! # Architecture
//!
//! The [`codec`] is a sans-IO state machine. It never touches a socket; the
//! [`connection`] read loop asks it which buffer to fill, performs the read,
//! and reports the byte count back. Keeping the codec pure means every framing
//! edge case is testable without a network, and it means framing state lives
//! with exactly one connection.
//!
//! TLS is not implemented here. [`channel::SecureChannel`] wraps `rustls`
//! (through `tokio-rustls`) and only exposes what the engine needs: an
//! established byte stream, the peer certificate chain and the negotiated
//! protocol version. Certificate decisions are delegated to a
//! [`verify::CertificateValidator`] predicate.
//!
//! # Components
//!
//! - [`codec`]: 1-byte header + payload framing state machine
//! - [`connection`]: Connection handle, writer, read loop
//! - [`lifecycle`]: Disconnect reasons and at-most-once disposal
//! - [`event`]: Event enums, sinks and the observer list
//! - [`channel`]: Secure channel adapter over `tokio-rustls`
//! - [`verify`]: Certificate validation predicates and rustls verifiers
//! - [`tls`]: Protocol version selection and crypto provider
//! - [`identity`]: Certificate identities (PEM, DER, self-signed)
//! - [`transport`]: Listener abstraction (TCP, simulation)
//! - [`error`]: Error types

pub mod channel;
pub mod codec;
pub mod connection;
pub mod error;
pub mod event;
pub mod identity;
pub mod lifecycle;
pub mod tls;
pub mod transport;
pub mod verify;

pub use channel::SecureChannel;
pub use codec::{FrameCodec, FrameState};
pub use connection::{Connection, ConnectionId, FrameReader};
pub use error::{ConfigError, ConnectionError, FrameError, HandshakeError, ReadFailure};
pub use event::{ClientEvent, EventSink, FnSink, Observers, ServerEvent};
pub use identity::{CertificateIdentity, load_certificates, load_revocation_lists};
pub use lifecycle::{Disposal, DisconnectReason};
pub use tls::TlsProtocol;
pub use transport::Listener;
pub use verify::{
    AcceptNameMismatch, CertificateValidator, PeerCertificate, PolicyErrors, RequireValid,
};
