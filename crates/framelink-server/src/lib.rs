//! framelink server
//!
//! Accepts TCP connections, completes the TLS handshake for each in its own
//! task, registers the resulting clients and reports their lifecycle through
//! [`ServerEvent`](framelink_core::ServerEvent)s.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framelink_core::{CertificateIdentity, ServerEvent};
//! use framelink_server::{BasicClient, Server, ServerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = CertificateIdentity::self_signed(vec!["localhost".to_owned()])?;
//! let server = Server::basic(ServerConfig::builder(identity).build()?);
//!
//! let (events, mut rx) = tokio::sync::mpsc::unbounded_channel::<ServerEvent<BasicClient>>();
//! server.subscribe(Arc::new(events));
//! server.listen("127.0.0.1:0".parse()?).await?;
//!
//! while let Some(event) = rx.recv().await {
//!     if let ServerEvent::MessageReceived { message, .. } = event {
//!         server.broadcast(&message).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod acceptor;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;

pub use config::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_WRITE_TIMEOUT, ServerConfig, ServerConfigBuilder,
};
pub use error::ServerError;
pub use registry::{BasicClient, ClientFactory, ClientRegistry, ServerClient};
pub use server::Server;
