//! Listener abstraction.
//!
//! The server's accept loop is written against [`Listener`] so it runs over
//! real TCP in production and over simulated TCP (turmoil) in tests.

use std::{io, net::SocketAddr};

use async_trait::async_trait;

use crate::channel::SecureStream;

/// Source of inbound byte streams.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Stream type produced for each accepted peer.
    type Stream: SecureStream;

    /// Wait for the next inbound connection.
    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Listener for tokio::net::TcpListener {
    type Stream = tokio::net::TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        let (stream, addr) = tokio::net::TcpListener::accept(self).await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::TcpListener::local_addr(self)
    }
}
