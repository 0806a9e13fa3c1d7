//! Server error types.

use std::io;

use framelink_core::{ConnectionError, ConnectionId};
use thiserror::Error;

/// Errors returned by [`Server`](crate::Server) operations.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Listening socket could not be bound or queried.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    /// An accept loop is already running.
    #[error("server is already listening")]
    AlreadyListening,

    /// The server has been shut down.
    #[error("server is shut down")]
    ShutDown,

    /// No registered client has this id.
    #[error("unknown client {0}")]
    UnknownClient(ConnectionId),

    /// Write to a client failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
