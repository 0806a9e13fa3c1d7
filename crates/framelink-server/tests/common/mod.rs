//! Shared fixtures for server integration tests.
//!
//! Every test gets its own self-signed server identity and a server bound to
//! an ephemeral loopback port, so tests never interfere with each other.

#![allow(dead_code)]

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use framelink_client::{Client, ClientConfig, ClientConfigBuilder, ClientError, Connector};
use framelink_core::{CertificateIdentity, ClientEvent, ServerEvent};
use framelink_server::{BasicClient, Server, ServerConfig, ServerConfigBuilder};
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Upper bound for any single expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Window in which an unexpected event would have shown up.
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

/// Name on every test server certificate.
pub const SERVER_NAME: &str = "localhost";

/// A listening server plus its event stream.
pub struct TestServer {
    pub server: Arc<Server<BasicClient>>,
    pub addr: SocketAddr,
    pub events: UnboundedReceiver<ServerEvent<BasicClient>>,
    pub identity: CertificateIdentity,
}

impl TestServer {
    /// Start a server with default settings.
    pub async fn start() -> Self {
        Self::start_with(|builder| builder).await
    }

    /// Start a server after customizing its configuration.
    pub async fn start_with(
        configure: impl FnOnce(ServerConfigBuilder) -> ServerConfigBuilder,
    ) -> Self {
        let identity = CertificateIdentity::self_signed(vec![SERVER_NAME.to_owned()]).unwrap();
        let config = configure(ServerConfig::builder(identity.clone())).build().unwrap();

        let server = Arc::new(Server::basic(config));
        let (tx, events) = mpsc::unbounded_channel::<ServerEvent<BasicClient>>();
        server.subscribe(Arc::new(tx));

        let addr = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        Self { server, addr, events, identity }
    }

    /// Client configuration that trusts this server.
    pub fn client_config(&self) -> ClientConfigBuilder {
        ClientConfig::builder().trust_only(self.identity.chain().to_vec())
    }

    /// Connect a default client that expects the right name.
    pub async fn connect(&self) -> TestClient {
        self.connect_with(|builder| builder, Some(SERVER_NAME)).await.unwrap()
    }

    /// Connect a customized client.
    pub async fn connect_with(
        &self,
        configure: impl FnOnce(ClientConfigBuilder) -> ClientConfigBuilder,
        expected_peer: Option<&str>,
    ) -> Result<TestClient, ClientError> {
        let config = configure(self.client_config()).build().unwrap();
        TestClient::connect(config, self.addr, expected_peer).await
    }

    /// Next server event, panicking after [`EVENT_TIMEOUT`].
    pub async fn next_event(&mut self) -> ServerEvent<BasicClient> {
        next(&mut self.events).await
    }

    /// Wait for a `ClientConnected` and return the client.
    pub async fn expect_connected(&mut self) -> Arc<BasicClient> {
        match self.next_event().await {
            ServerEvent::ClientConnected { client } => client,
            other => panic!("expected ClientConnected, got {other:?}"),
        }
    }
}

/// A connected client plus its event stream.
pub struct TestClient {
    pub client: Client,
    pub events: UnboundedReceiver<ClientEvent>,
}

impl TestClient {
    /// Connect and consume the `Connected` event.
    pub async fn connect(
        config: ClientConfig,
        addr: SocketAddr,
        expected_peer: Option<&str>,
    ) -> Result<Self, ClientError> {
        let connector = Connector::new(config);
        let (tx, mut events) = mpsc::unbounded_channel::<ClientEvent>();
        connector.subscribe(Arc::new(tx));

        let client = connector.connect(addr, expected_peer).await?;
        assert_eq!(next(&mut events).await, ClientEvent::Connected);
        Ok(Self { client, events })
    }

    /// Next client event, panicking after [`EVENT_TIMEOUT`].
    pub async fn next_event(&mut self) -> ClientEvent {
        next(&mut self.events).await
    }

    /// Wait for the next received message.
    pub async fn expect_message(&mut self) -> String {
        match self.next_event().await {
            ClientEvent::MessageReceived { message } => message,
            other => panic!("expected MessageReceived, got {other:?}"),
        }
    }
}

/// Receive with a timeout.
pub async fn next<E>(events: &mut UnboundedReceiver<E>) -> E {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Assert nothing arrives during [`QUIET_PERIOD`].
pub async fn assert_quiet<E: std::fmt::Debug>(events: &mut UnboundedReceiver<E>) {
    if let Ok(Some(event)) = tokio::time::timeout(QUIET_PERIOD, events.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

/// Poll `condition` until it holds or [`EVENT_TIMEOUT`] passes.
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
