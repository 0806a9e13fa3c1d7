//! Client error types.

use std::io;

use framelink_core::HandshakeError;
use thiserror::Error;

/// Errors returned while connecting.
#[derive(Error, Debug)]
pub enum ClientError {
    /// TCP connection could not be opened.
    #[error("failed to connect: {0}")]
    Connect(#[source] io::Error),

    /// TLS handshake failed or timed out.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}
