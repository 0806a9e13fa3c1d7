//! framelink client
//!
//! Connects to a framelink server over TLS and exchanges text messages.
//! Lifecycle and message events are delivered to the sinks registered on the
//! [`Connector`].

pub mod client;
pub mod config;
pub mod error;

pub use client::{Client, Connector};
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_HANDSHAKE_TIMEOUT};
pub use error::ClientError;
