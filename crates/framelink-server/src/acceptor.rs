//! Accept loop and per-peer handshake task.

use std::{net::SocketAddr, sync::Arc};

use framelink_core::{
    Connection, DisconnectReason, Listener, SecureChannel, ServerEvent, channel::SecureStream,
};

use crate::{registry::ServerClient, server::Shared};

/// Accept peers until the task is aborted.
///
/// Each accepted stream gets its own task, so a slow handshake never delays
/// the next accept. Accept errors are logged and the loop carries on.
pub(crate) async fn run<L, C>(listener: L, shared: Arc<Shared<C>>)
where
    L: Listener,
    C: ServerClient,
{
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                tracing::debug!(peer = %peer_addr, "accepted connection");
                tokio::spawn(serve_peer(Arc::clone(&shared), stream, peer_addr));
            },
            Err(error) => {
                tracing::warn!(%error, "accept failed");
            },
        }
    }
}

/// Handshake, register, read until disconnect.
async fn serve_peer<S, C>(shared: Arc<Shared<C>>, stream: S, peer_addr: SocketAddr)
where
    S: SecureStream,
    C: ServerClient,
{
    let timeout = shared.config.handshake_timeout();
    let channel = match SecureChannel::accept(&shared.acceptor, stream, peer_addr, timeout).await {
        Ok(channel) => channel,
        Err(error) => {
            tracing::debug!(peer = %peer_addr, %error, "handshake failed");
            return;
        },
    };

    let (connection, reader) = Connection::establish(channel);
    if shared.is_shutting_down() {
        discard(&connection).await;
        return;
    }

    let client = Arc::new(shared.factory.create_client(connection.clone()));
    shared.registry.add(Arc::clone(&client));
    tracing::info!(
        client = %connection.id(),
        peer = %peer_addr,
        protocol = ?connection.protocol_version(),
        "client connected"
    );
    shared.observers.emit(&ServerEvent::ClientConnected { client: Arc::clone(&client) });

    // Shutdown may have snapshotted the registry just before the insert above.
    if shared.is_shutting_down() {
        shared.disconnect_client(&client, DisconnectReason::UserForced).await;
        return;
    }

    let reason = connection
        .drive(reader, shared.config.idle_timeout(), |message| {
            tracing::trace!(client = %connection.id(), len = message.len(), "message received");
            shared
                .observers
                .emit(&ServerEvent::MessageReceived { client: Arc::clone(&client), message });
        })
        .await;

    shared.disconnect_client(&client, reason).await;
}

async fn discard(connection: &Connection) {
    if connection.begin_dispose() {
        tracing::debug!(client = %connection.id(), "handshake completed during shutdown, dropping");
        connection.release().await;
    }
}
