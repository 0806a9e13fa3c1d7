//! Lifecycle events and observer delivery.
//!
//! Applications register [`EventSink`]s on an [`Observers`] list. Every event
//! is delivered once to every sink registered at the time of emission, in
//! registration order. A panicking sink is logged and skipped so it cannot
//! abort the disconnect sequence that emitted the event.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::lifecycle::DisconnectReason;

/// Events delivered to a client application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Handshake completed; messages can flow.
    Connected,

    /// Connection ended. Delivered exactly once per connection.
    Disconnected {
        /// Why the connection ended
        reason: DisconnectReason,
    },

    /// A complete message arrived from the server.
    MessageReceived {
        /// Decoded text
        message: String,
    },
}

/// Events delivered to a server application.
///
/// `C` is the application's per-connection type, produced by the server's
/// client factory.
pub enum ServerEvent<C> {
    /// A client completed its handshake and was registered.
    ClientConnected {
        /// The registered client
        client: Arc<C>,
    },

    /// A registered client was removed. Delivered exactly once per client.
    ClientDisconnected {
        /// The removed client
        client: Arc<C>,
        /// Why the connection ended
        reason: DisconnectReason,
    },

    /// A complete message arrived from a client.
    MessageReceived {
        /// Sender
        client: Arc<C>,
        /// Decoded text
        message: String,
    },
}

impl<C> ServerEvent<C> {
    /// The client this event is about.
    pub fn client(&self) -> &Arc<C> {
        match self {
            Self::ClientConnected { client }
            | Self::ClientDisconnected { client, .. }
            | Self::MessageReceived { client, .. } => client,
        }
    }
}

// Manual impls: cloning an event clones the `Arc`, so `C` needs no bounds.
impl<C> Clone for ServerEvent<C> {
    fn clone(&self) -> Self {
        match self {
            Self::ClientConnected { client } => {
                Self::ClientConnected { client: Arc::clone(client) }
            },
            Self::ClientDisconnected { client, reason } => {
                Self::ClientDisconnected { client: Arc::clone(client), reason: *reason }
            },
            Self::MessageReceived { client, message } => {
                Self::MessageReceived { client: Arc::clone(client), message: message.clone() }
            },
        }
    }
}

impl<C> fmt::Debug for ServerEvent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientConnected { .. } => f.write_str("ClientConnected"),
            Self::ClientDisconnected { reason, .. } => {
                f.debug_struct("ClientDisconnected").field("reason", reason).finish()
            },
            Self::MessageReceived { message, .. } => {
                f.debug_struct("MessageReceived").field("message", message).finish()
            },
        }
    }
}

/// Receives events of type `E`.
///
/// Called synchronously from the connection's task. Implementations should
/// hand work off (to a channel, a spawned task) rather than block.
pub trait EventSink<E>: Send + Sync {
    /// Deliver one event.
    fn deliver(&self, event: &E);
}

/// Forwards every event into an unbounded channel. Events emitted after the
/// receiver is dropped are discarded.
impl<E> EventSink<E> for mpsc::UnboundedSender<E>
where
    E: Clone + Send,
{
    fn deliver(&self, event: &E) {
        let _ = self.send(event.clone());
    }
}

/// Adapts a closure into an [`EventSink`].
pub struct FnSink<F>(pub F);

impl<E, F> EventSink<E> for FnSink<F>
where
    F: Fn(&E) + Send + Sync,
{
    fn deliver(&self, event: &E) {
        (self.0)(event);
    }
}

/// Ordered list of sinks for one event type.
pub struct Observers<E> {
    sinks: RwLock<Vec<Arc<dyn EventSink<E>>>>,
}

impl<E> Observers<E> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self { sinks: RwLock::new(Vec::new()) }
    }

    /// Register a sink. It receives every event emitted from now on.
    pub fn subscribe(&self, sink: Arc<dyn EventSink<E>>) {
        self.sinks.write().push(sink);
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    /// Whether no sink is registered.
    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    /// Deliver `event` to every registered sink.
    ///
    /// The list is snapshotted first, so a sink may subscribe further sinks
    /// without deadlocking; those only see later events.
    pub fn emit(&self, event: &E) {
        let sinks = self.sinks.read().clone();
        for sink in sinks {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(event)));
            if delivered.is_err() {
                tracing::error!("event sink panicked; continuing with remaining sinks");
            }
        }
    }
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers").field("sinks", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct PanickingSink;

    impl EventSink<ClientEvent> for PanickingSink {
        fn deliver(&self, _event: &ClientEvent) {
            panic!("bad sink");
        }
    }

    #[test]
    fn every_sink_sees_every_event_once() {
        let observers: Observers<ClientEvent> = Observers::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel::<ClientEvent>();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel::<ClientEvent>();
        observers.subscribe(Arc::new(tx_a));
        observers.subscribe(Arc::new(tx_b));

        observers.emit(&ClientEvent::Connected);
        observers.emit(&ClientEvent::MessageReceived { message: "hi".into() });

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.try_recv().unwrap(), ClientEvent::Connected);
            assert_eq!(rx.try_recv().unwrap(), ClientEvent::MessageReceived {
                message: "hi".into()
            });
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn panicking_sink_does_not_starve_others() {
        let observers: Observers<ClientEvent> = Observers::new();
        let count = Arc::new(AtomicUsize::new(0));

        observers.subscribe(Arc::new(PanickingSink));
        let counter = Arc::clone(&count);
        observers.subscribe(Arc::new(FnSink(move |_: &ClientEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        observers.emit(&ClientEvent::Disconnected { reason: DisconnectReason::UserForced });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let observers: Observers<ClientEvent> = Observers::new();
        let (tx, rx) = mpsc::unbounded_channel::<ClientEvent>();
        observers.subscribe(Arc::new(tx));
        drop(rx);

        observers.emit(&ClientEvent::Connected);
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn server_event_clone_shares_client() {
        let client = Arc::new(7_u32);
        let event =
            ServerEvent::MessageReceived { client: Arc::clone(&client), message: "m".into() };
        let copy = event.clone();

        assert!(Arc::ptr_eq(event.client(), copy.client()));
        assert_eq!(Arc::strong_count(&client), 3);
    }
}
