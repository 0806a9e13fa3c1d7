//! Live client set and the per-connection extension point.
//!
//! Applications attach their own state to each connection by handing the
//! server a [`ClientFactory`]. The server only ever talks to the result
//! through [`ServerClient`], so the concrete type is the application's
//! business.
//!
//! Registry membership tracks the event stream: a client is inserted before
//! its `ClientConnected` event and removed before its `ClientDisconnected`
//! event.

use std::{sync::Arc, time::Instant};

use framelink_core::{Connection, ConnectionId};
use parking_lot::Mutex;

/// Capability the server needs from an application client type.
pub trait ServerClient: Send + Sync + 'static {
    /// The connection this client wraps.
    fn connection(&self) -> &Connection;

    /// Identifier of the wrapped connection.
    fn id(&self) -> ConnectionId {
        self.connection().id()
    }
}

/// Produces the application's client object for a freshly established
/// connection.
pub trait ClientFactory<C>: Send + Sync + 'static {
    /// Wrap `connection`.
    fn create_client(&self, connection: Connection) -> C;
}

impl<C, F> ClientFactory<C> for F
where
    F: Fn(Connection) -> C + Send + Sync + 'static,
{
    fn create_client(&self, connection: Connection) -> C {
        self(connection)
    }
}

/// Client type used when the application attaches no state of its own.
#[derive(Debug, Clone)]
pub struct BasicClient {
    connection: Connection,
    connected_at: Instant,
}

impl BasicClient {
    /// Wrap a connection, stamping the current time.
    pub fn new(connection: Connection) -> Self {
        Self { connection, connected_at: Instant::now() }
    }

    /// When the handshake completed.
    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

impl ServerClient for BasicClient {
    fn connection(&self) -> &Connection {
        &self.connection
    }
}

/// The server's set of connected clients, in connection order.
pub struct ClientRegistry<C> {
    clients: Mutex<Vec<Arc<C>>>,
}

impl<C: ServerClient> ClientRegistry<C> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { clients: Mutex::new(Vec::new()) }
    }

    /// Insert a client.
    pub fn add(&self, client: Arc<C>) {
        self.clients.lock().push(client);
    }

    /// Remove a client by id. Returns `None` if it was not registered.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<C>> {
        let mut clients = self.clients.lock();
        let index = clients.iter().position(|client| client.id() == id)?;
        Some(clients.remove(index))
    }

    /// Look up a client by id.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<C>> {
        self.clients.lock().iter().find(|client| client.id() == id).cloned()
    }

    /// Whether a client with `id` is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.clients.lock().iter().any(|client| client.id() == id)
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Copy of the current membership, safe to iterate across awaits.
    pub fn snapshot(&self) -> Vec<Arc<C>> {
        self.clients.lock().clone()
    }
}

impl<C: ServerClient> Default for ClientRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
