//! Connector and client handle.

use std::{fmt, net::SocketAddr, sync::Arc};

use framelink_core::{
    ClientEvent, Connection, ConnectionError, DisconnectReason, EventSink, HandshakeError,
    Observers, SecureChannel, channel::SecureStream,
};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::{config::ClientConfig, error::ClientError};

/// Opens connections and reports their events to the registered sinks.
///
/// Every client produced by one connector shares its sinks, so use one
/// connector per logical peer when events need telling apart.
pub struct Connector {
    config: ClientConfig,
    connector: TlsConnector,
    observers: Arc<Observers<ClientEvent>>,
}

impl Connector {
    /// Create a connector. Register sinks before connecting to see
    /// `Connected`.
    pub fn new(config: ClientConfig) -> Self {
        let connector = TlsConnector::from(config.tls_config());
        Self { config, connector, observers: Arc::new(Observers::new()) }
    }

    /// Register an event sink.
    pub fn subscribe(&self, sink: Arc<dyn EventSink<ClientEvent>>) {
        self.observers.subscribe(sink);
    }

    /// Connect over TCP and complete the handshake.
    ///
    /// `expected_peer` is the name the server certificate is checked against;
    /// the address's IP is used when it is `None`.
    ///
    /// # Errors
    ///
    /// [`ClientError::Connect`] if the TCP connection fails, otherwise as
    /// [`Connector::connect_stream`]. No event is emitted on failure.
    pub async fn connect(
        &self,
        addr: SocketAddr,
        expected_peer: Option<&str>,
    ) -> Result<Client, ClientError> {
        let name = server_name(addr, expected_peer)?;
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Connect)?;
        stream.set_nodelay(true).map_err(ClientError::Connect)?;
        self.establish(stream, addr, name).await
    }

    /// Complete the handshake over an already connected stream.
    ///
    /// # Errors
    ///
    /// [`ClientError::Handshake`] if the name is invalid, the server
    /// certificate is rejected, or the handshake fails or times out.
    pub async fn connect_stream<S>(
        &self,
        stream: S,
        peer_addr: SocketAddr,
        expected_peer: Option<&str>,
    ) -> Result<Client, ClientError>
    where
        S: SecureStream,
    {
        let name = server_name(peer_addr, expected_peer)?;
        self.establish(stream, peer_addr, name).await
    }

    async fn establish<S>(
        &self,
        stream: S,
        peer_addr: SocketAddr,
        name: ServerName<'static>,
    ) -> Result<Client, ClientError>
    where
        S: SecureStream,
    {
        let timeout = self.config.handshake_timeout();
        let channel = SecureChannel::connect(&self.connector, name, stream, peer_addr, timeout)
            .await
            .inspect_err(|error| tracing::debug!(peer = %peer_addr, %error, "handshake failed"))?;

        let (connection, reader) = Connection::establish(channel);
        tracing::info!(
            connection = %connection.id(),
            peer = %peer_addr,
            protocol = ?connection.protocol_version(),
            "connected"
        );
        self.observers.emit(&ClientEvent::Connected);

        let driver = connection.clone();
        let observers = Arc::clone(&self.observers);
        let idle_timeout = self.config.idle_timeout();
        tokio::spawn(async move {
            let reason = driver
                .drive(reader, idle_timeout, |message| {
                    observers.emit(&ClientEvent::MessageReceived { message });
                })
                .await;
            disconnect(&driver, &observers, reason).await;
        });

        Ok(Client { connection, observers: Arc::clone(&self.observers) })
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

/// An established client connection.
///
/// Dropping the handle does not close the connection; call
/// [`Client::close`].
pub struct Client {
    connection: Connection,
    observers: Arc<Observers<ClientEvent>>,
}

impl Client {
    /// Send one message to the server.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] after disconnect, [`ConnectionError::Frame`]
    /// for messages that cannot be framed, [`ConnectionError::Write`] if the
    /// channel fails.
    pub async fn write(&self, message: &str) -> Result<(), ConnectionError> {
        self.connection.write(message).await
    }

    /// Close the connection, emitting `Disconnected(UserForced)` unless it
    /// already ended.
    pub async fn close(&self) {
        disconnect(&self.connection, &self.observers, DisconnectReason::UserForced).await;
    }

    /// Whether the connection is still up.
    pub fn is_connected(&self) -> bool {
        !self.connection.is_disposed()
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("connection", &self.connection).finish_non_exhaustive()
    }
}

async fn disconnect(
    connection: &Connection,
    observers: &Observers<ClientEvent>,
    reason: DisconnectReason,
) -> bool {
    if !connection.begin_dispose() {
        return false;
    }

    tracing::info!(connection = %connection.id(), %reason, "disconnected");
    observers.emit(&ClientEvent::Disconnected { reason });
    connection.release().await;
    true
}

fn server_name(
    addr: SocketAddr,
    expected_peer: Option<&str>,
) -> Result<ServerName<'static>, HandshakeError> {
    match expected_peer {
        None => Ok(ServerName::IpAddress(addr.ip().into())),
        Some(name) => ServerName::try_from(name.to_owned())
            .map_err(|_| HandshakeError::InvalidServerName(name.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_defaults_to_ip() {
        let addr: SocketAddr = "10.1.2.3:443".parse().unwrap();
        let name = server_name(addr, None).unwrap();
        assert_eq!(name.to_str(), "10.1.2.3");
    }

    #[test]
    fn server_name_accepts_dns_and_ip_strings() {
        let addr: SocketAddr = "10.1.2.3:443".parse().unwrap();
        assert_eq!(server_name(addr, Some("example.com")).unwrap().to_str(), "example.com");
        assert!(matches!(
            server_name(addr, Some("192.168.0.1")).unwrap(),
            ServerName::IpAddress(_)
        ));
    }

    #[test]
    fn invalid_server_name_is_rejected() {
        let addr: SocketAddr = "10.1.2.3:443".parse().unwrap();
        let err = server_name(addr, Some("not a hostname!")).unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidServerName(_)));
    }
}
