//! Server façade.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use framelink_core::{
    ConnectionError, ConnectionId, DisconnectReason, EventSink, FrameCodec, Listener, Observers,
    ServerEvent,
};
use parking_lot::Mutex;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_rustls::TlsAcceptor;

use crate::{
    acceptor,
    config::ServerConfig,
    error::ServerError,
    registry::{BasicClient, ClientFactory, ClientRegistry, ServerClient},
};

/// State shared between the façade, the accept loop and the peer tasks.
pub(crate) struct Shared<C> {
    pub(crate) config: ServerConfig,
    pub(crate) acceptor: TlsAcceptor,
    pub(crate) factory: Box<dyn ClientFactory<C>>,
    pub(crate) registry: ClientRegistry<C>,
    pub(crate) observers: Observers<ServerEvent<C>>,
    shutting_down: AtomicBool,
}

impl<C: ServerClient> Shared<C> {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Run the disconnect sequence for `client` unless it already ran.
    ///
    /// Order: registry removal, `ClientDisconnected`, release.
    pub(crate) async fn disconnect_client(
        &self,
        client: &Arc<C>,
        reason: DisconnectReason,
    ) -> bool {
        let connection = client.connection();
        if !connection.begin_dispose() {
            return false;
        }

        self.registry.remove(connection.id());
        tracing::info!(
            client = %connection.id(),
            peer = %connection.peer_addr(),
            %reason,
            "client disconnected"
        );
        self.observers
            .emit(&ServerEvent::ClientDisconnected { client: Arc::clone(client), reason });
        connection.release().await;
        true
    }

    /// Write to one client under the configured write timeout.
    ///
    /// A client that does not take the message in time is disconnected with
    /// [`DisconnectReason::ConnectionClosed`].
    pub(crate) async fn send(&self, client: &C, message: &str) -> Result<(), ConnectionError> {
        let connection = client.connection();
        let written = connection.write_within(message, Some(self.config.write_timeout())).await;

        if matches!(written, Err(ConnectionError::TimedOut(_))) {
            match self.registry.get(connection.id()) {
                Some(client) => {
                    self.disconnect_client(&client, DisconnectReason::ConnectionClosed).await;
                },
                None => connection.cancel(),
            }
        }
        written
    }
}

/// A TLS message server.
///
/// `C` is the application's per-client type, created by the factory passed to
/// [`Server::new`]. Use [`Server::basic`] when no per-client state is needed.
pub struct Server<C: ServerClient> {
    shared: Arc<Shared<C>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server<BasicClient> {
    /// Server whose clients are plain [`BasicClient`]s.
    pub fn basic(config: ServerConfig) -> Self {
        Self::new(config, BasicClient::new)
    }
}

impl<C: ServerClient> Server<C> {
    /// Create a server. Nothing is bound until [`Server::listen`].
    pub fn new(config: ServerConfig, factory: impl ClientFactory<C>) -> Self {
        let shared = Shared {
            acceptor: TlsAcceptor::from(config.tls()),
            config,
            factory: Box::new(factory),
            registry: ClientRegistry::new(),
            observers: Observers::new(),
            shutting_down: AtomicBool::new(false),
        };

        Self {
            shared: Arc::new(shared),
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Register an event sink.
    pub fn subscribe(&self, sink: Arc<dyn EventSink<ServerEvent<C>>>) {
        self.shared.observers.subscribe(sink);
    }

    /// Bind a TCP listener on `addr` and start accepting clients.
    ///
    /// Returns the bound address, which differs from `addr` when port 0 was
    /// requested.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound, otherwise as
    /// [`Server::listen_on`].
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
        self.listen_on(listener)
    }

    /// Start accepting clients from `listener`.
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyListening`] if an accept loop is running,
    /// [`ServerError::ShutDown`] after [`Server::shutdown`].
    pub fn listen_on<L: Listener>(&self, listener: L) -> Result<SocketAddr, ServerError> {
        if self.shared.is_shutting_down() {
            return Err(ServerError::ShutDown);
        }

        let mut accept_task = self.accept_task.lock();
        if accept_task.is_some() {
            return Err(ServerError::AlreadyListening);
        }

        let addr = listener.local_addr().map_err(ServerError::Bind)?;
        *accept_task = Some(tokio::spawn(acceptor::run(listener, Arc::clone(&self.shared))));
        *self.local_addr.lock() = Some(addr);

        tracing::info!(%addr, protocol = %self.shared.config.protocol(), "server listening");
        Ok(addr)
    }

    /// Address of the running listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Send a message to one client.
    ///
    /// # Errors
    ///
    /// [`ServerError::Connection`] if the message cannot be framed, the client
    /// is disconnecting, the write fails, or the client does not take the
    /// message within the write timeout (it is then disconnected).
    pub async fn write(&self, client: &C, message: &str) -> Result<(), ServerError> {
        self.shared.send(client, message).await?;
        Ok(())
    }

    /// Send a message to the client with `id`.
    ///
    /// # Errors
    ///
    /// [`ServerError::UnknownClient`] if no such client is registered,
    /// otherwise as [`Server::write`].
    pub async fn write_to(&self, id: ConnectionId, message: &str) -> Result<(), ServerError> {
        let client = self.shared.registry.get(id).ok_or(ServerError::UnknownClient(id))?;
        self.write(&client, message).await
    }

    /// Send a message to every registered client.
    ///
    /// Writes run concurrently over a snapshot of the registry, each under the
    /// write timeout, so one stalled client cannot hold up the others. Returns
    /// how many clients the message reached; individual failures are logged by
    /// the connection.
    ///
    /// # Errors
    ///
    /// [`ServerError::Connection`] if the message cannot be framed.
    pub async fn broadcast(&self, message: &str) -> Result<usize, ServerError> {
        FrameCodec::encode(message).map_err(ConnectionError::from)?;

        let clients = self.shared.registry.snapshot();
        let writes = clients.iter().map(|client| self.shared.send(client, message));
        let delivered =
            futures::future::join_all(writes).await.into_iter().filter(Result::is_ok).count();

        tracing::debug!(delivered, registered = clients.len(), "broadcast");
        Ok(delivered)
    }

    /// Disconnect the client with `id`.
    ///
    /// # Errors
    ///
    /// [`ServerError::UnknownClient`] if no such client is registered.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<(), ServerError> {
        let client = self.shared.registry.get(id).ok_or(ServerError::UnknownClient(id))?;
        self.shared.disconnect_client(&client, DisconnectReason::UserForced).await;
        Ok(())
    }

    /// Currently registered clients.
    pub fn clients(&self) -> Vec<Arc<C>> {
        self.shared.registry.snapshot()
    }

    /// The live client registry.
    pub fn registry(&self) -> &ClientRegistry<C> {
        &self.shared.registry
    }

    /// Configuration the server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Stop accepting and disconnect every client.
    ///
    /// Handshakes still in flight are dropped when they complete. The server
    /// cannot listen again afterwards.
    pub async fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }

        let clients = self.shared.registry.snapshot();
        tracing::info!(clients = clients.len(), "server shutting down");

        let disconnects = clients
            .iter()
            .map(|client| self.shared.disconnect_client(client, DisconnectReason::UserForced));
        futures::future::join_all(disconnects).await;
    }
}

/// Stops accepting and cancels every registered client. Each client's own
/// task then runs its disconnect sequence with
/// [`DisconnectReason::UserForced`].
impl<C: ServerClient> Drop for Server<C> {
    fn drop(&mut self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        if let Some(task) = self.accept_task.get_mut().take() {
            task.abort();
        }
        for client in self.shared.registry.snapshot() {
            client.connection().cancel();
        }
    }
}

impl<C: ServerClient> fmt::Debug for Server<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("clients", &self.shared.registry.len())
            .field("shutting_down", &self.shared.is_shutting_down())
            .finish_non_exhaustive()
    }
}
