//! Connection lifecycle bookkeeping.
//!
//! A connection can be torn down from several places at once: the user closes
//! it, its read loop fails, the server shuts down. Whoever wins
//! [`Disposal::begin`] runs the disconnect sequence; everyone else returns
//! without touching the connection. This is what makes disconnect events
//! exactly-once.

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Closed locally on purpose (client close, server kick, shutdown).
    UserForced,
    /// Peer closed, reset, sent garbage, or went idle.
    ConnectionClosed,
    /// The secure channel was rejected after the connection was established.
    ConnectionFailed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UserForced => "user forced",
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionFailed => "connection failed",
        };
        f.write_str(text)
    }
}

/// At-most-once disposal flag.
#[derive(Debug, Default)]
pub struct Disposal {
    disposed: AtomicBool,
}

impl Disposal {
    /// Create an undisposed flag.
    pub const fn new() -> Self {
        Self { disposed: AtomicBool::new(false) }
    }

    /// Claim disposal.
    ///
    /// Returns `true` for exactly one caller over the flag's lifetime.
    pub fn begin(&self) -> bool {
        self.disposed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Whether disposal has been claimed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
