//! Deterministic simulation harness for framelink.
//!
//! Runs real framelink servers and clients (real TLS, real framing) over
//! turmoil's simulated network, so latency, partitions and many concurrent
//! peers can be tested reproducibly and in simulated time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{
    error::Error,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use async_trait::async_trait;
use framelink_client::{Client, ClientError, Connector};
use framelink_core::{CertificateIdentity, ConfigError, Listener, ServerEvent};
use framelink_server::{BasicClient, Server, ServerConfig, ServerError};
use tokio::sync::mpsc;

/// Port simulated servers listen on.
pub const SERVER_PORT: u16 = 4443;

/// Host name of the simulated server, also the name on its certificate.
pub const SERVER_HOST: &str = "server";

/// Result type turmoil hosts return.
pub type SimResult = Result<(), Box<dyn Error>>;

/// Listener on the simulated network.
pub struct SimListener {
    inner: turmoil::net::TcpListener,
}

impl SimListener {
    /// Bind on every simulated interface of the current host.
    pub async fn bind(port: u16) -> io::Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let inner = turmoil::net::TcpListener::bind(addr).await?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Listener for SimListener {
    type Stream = turmoil::net::TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        self.inner.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Connect `connector` to `host:port` over the simulated network.
///
/// # Errors
///
/// [`ClientError::Connect`] if the simulated TCP connection fails, otherwise
/// whatever the handshake reports.
pub async fn sim_connect(
    connector: &Connector,
    host: &str,
    port: u16,
    expected_peer: Option<&str>,
) -> Result<Client, ClientError> {
    let target = format!("{host}:{port}");
    let stream = turmoil::net::TcpStream::connect(target.as_str())
        .await
        .map_err(ClientError::Connect)?;
    let peer_addr = stream.peer_addr().map_err(ClientError::Connect)?;
    connector.connect_stream(stream, peer_addr, expected_peer).await
}

/// Identity for the simulated server, valid for [`SERVER_HOST`].
///
/// # Errors
///
/// Propagates certificate generation failures.
pub fn server_identity() -> Result<CertificateIdentity, ConfigError> {
    CertificateIdentity::self_signed(vec![SERVER_HOST.to_owned()])
}

/// Run a server that echoes every message back to its sender.
///
/// Meant as the body of a turmoil host; returns only if the event stream
/// ends.
///
/// # Errors
///
/// Bind or listen failures.
pub async fn run_echo_server(config: ServerConfig, port: u16) -> Result<(), ServerError> {
    let server = Arc::new(Server::basic(config));
    let (tx, mut events) = mpsc::unbounded_channel::<ServerEvent<BasicClient>>();
    server.subscribe(Arc::new(tx));

    let listener = SimListener::bind(port).await.map_err(ServerError::Bind)?;
    server.listen_on(listener)?;

    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::MessageReceived { client, message } => {
                if let Err(error) = server.write(&client, &message).await {
                    tracing::debug!(%error, "echo failed");
                }
            },
            ServerEvent::ClientConnected { .. } | ServerEvent::ClientDisconnected { .. } => {},
        }
    }
    Ok(())
}
