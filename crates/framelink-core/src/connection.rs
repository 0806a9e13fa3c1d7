//! Connection handle, writer and read loop.
//!
//! A [`Connection`] is a cheap, cloneable handle to one established secure
//! channel. The stream is split on establishment: the write half lives behind
//! an async mutex inside the handle, the read half goes into a
//! [`FrameReader`] that is owned by exactly one read loop.
//!
//! # Teardown
//!
//! Disconnect sequences are run by whoever wins [`Connection::begin_dispose`].
//! The winner emits its event and then calls [`Connection::release`], which
//! cancels the connection, drops the write half and shuts the stream down.
//!
//! Cancellation is sticky. A read loop or a write that observes it stops
//! immediately: the read loop returns [`DisconnectReason::UserForced`], the
//! write returns [`ConnectionError::Closed`]. A write stalled on a peer that
//! stopped reading therefore never keeps `release` waiting.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rustls::{ProtocolVersion, pki_types::CertificateDer};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

use crate::{
    channel::{BoxedStream, SecureChannel},
    codec::FrameCodec,
    error::{ConnectionError, ReadFailure},
    lifecycle::{DisconnectReason, Disposal},
};

/// Upper bound on taking the write half and sending close_notify during
/// release.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handle to an established connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    peer_addr: SocketAddr,
    peer_certificates: Vec<CertificateDer<'static>>,
    protocol_version: Option<ProtocolVersion>,
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    disposal: Disposal,
    closed: CancellationToken,
}

impl Connection {
    /// Split an established channel into a handle and its reader.
    pub fn establish(channel: SecureChannel) -> (Self, FrameReader) {
        let (stream, peer_addr, peer_certificates, protocol_version) = channel.into_parts();
        let (read_half, write_half) = tokio::io::split(stream);

        let inner = Inner {
            id: ConnectionId::next(),
            peer_addr,
            peer_certificates,
            protocol_version,
            writer: Mutex::new(Some(write_half)),
            disposal: Disposal::new(),
            closed: CancellationToken::new(),
        };

        (Self { inner: Arc::new(inner) }, FrameReader::new(read_half))
    }

    /// Identifier of this connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Remote address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Certificate chain the peer presented, leaf first.
    #[must_use]
    pub fn peer_certificates(&self) -> &[CertificateDer<'static>] {
        &self.inner.peer_certificates
    }

    /// Negotiated TLS version.
    #[must_use]
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.inner.protocol_version
    }

    /// Whether a disconnect sequence has started.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposal.is_disposed()
    }

    /// Claim the right to run this connection's disconnect sequence.
    ///
    /// Returns `true` exactly once.
    pub fn begin_dispose(&self) -> bool {
        self.inner.disposal.begin()
    }

    /// Send one message.
    ///
    /// Writes are serialized per connection, so concurrent writers never
    /// interleave frame bytes. A pending write gives up as soon as the
    /// connection is cancelled.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::Frame`] if the message cannot be framed
    /// - [`ConnectionError::Closed`] if the connection is disconnecting
    /// - [`ConnectionError::Write`] if the channel rejects the bytes
    pub async fn write(&self, message: &str) -> Result<(), ConnectionError> {
        let frame = FrameCodec::encode(message)?;
        if self.is_disposed() || self.inner.closed.is_cancelled() {
            return Err(ConnectionError::Closed);
        }

        let mut writer = tokio::select! {
            biased;
            () = self.inner.closed.cancelled() => return Err(ConnectionError::Closed),
            writer = self.inner.writer.lock() => writer,
        };
        let Some(stream) = writer.as_mut() else {
            return Err(ConnectionError::Closed);
        };

        let written = tokio::select! {
            biased;
            () = self.inner.closed.cancelled() => return Err(ConnectionError::Closed),
            written = write_frame(stream, frame) => written,
        };

        written.map_err(|error| {
            tracing::warn!(
                connection = %self.inner.id,
                peer = %self.inner.peer_addr,
                %error,
                "write failed"
            );
            ConnectionError::Write(error)
        })
    }

    /// Send one message, giving up after `limit`.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::TimedOut`] if the peer does not take the bytes in
    /// time, otherwise as [`Connection::write`].
    pub async fn write_within(
        &self,
        message: &str,
        limit: Option<Duration>,
    ) -> Result<(), ConnectionError> {
        let Some(limit) = limit else {
            return self.write(message).await;
        };

        tokio::time::timeout(limit, self.write(message)).await.map_err(|_| {
            tracing::warn!(
                connection = %self.inner.id,
                peer = %self.inner.peer_addr,
                "write timed out"
            );
            ConnectionError::TimedOut(limit)
        })?
    }

    /// Cancel the connection without waiting.
    ///
    /// The read loop and any pending write stop at their next poll. The
    /// disconnect sequence still belongs to whoever wins
    /// [`Connection::begin_dispose`].
    pub fn cancel(&self) {
        self.inner.closed.cancel();
    }

    /// Cancel the connection and close the stream.
    ///
    /// Idempotent, and bounded by a five second limit even if the write half
    /// is held by a task that is never polled again. Only the disposal winner
    /// should call this, after emitting its disconnect event.
    pub async fn release(&self) {
        self.cancel();

        let shutdown = async {
            let writer = self.inner.writer.lock().await.take();
            match writer {
                Some(mut stream) => stream.shutdown().await,
                None => Ok(()),
            }
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await {
            Ok(Ok(())) => {},
            Ok(Err(error)) => {
                tracing::debug!(connection = %self.inner.id, %error, "shutdown failed");
            },
            Err(_) => {
                tracing::debug!(connection = %self.inner.id, "shutdown timed out");
            },
        }
    }

    /// Read messages until the connection ends.
    ///
    /// Each complete message is handed to `on_message` in arrival order. When
    /// `idle_timeout` is set, a gap longer than that between two messages ends
    /// the loop with [`DisconnectReason::ConnectionClosed`].
    pub async fn drive<F>(
        &self,
        mut reader: FrameReader,
        idle_timeout: Option<Duration>,
        mut on_message: F,
    ) -> DisconnectReason
    where
        F: FnMut(String),
    {
        loop {
            let next = tokio::select! {
                biased;
                () = self.inner.closed.cancelled() => return DisconnectReason::UserForced,
                next = reader.next_message_within(idle_timeout) => next,
            };

            match next {
                Ok(message) => on_message(message),
                Err(failure) => {
                    let reason = failure.disconnect_reason();
                    tracing::debug!(
                        connection = %self.inner.id,
                        peer = %self.inner.peer_addr,
                        %failure,
                        %reason,
                        "read loop ended"
                    );
                    return reason;
                },
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

async fn write_frame(stream: &mut WriteHalf<BoxedStream>, frame: &[u8]) -> std::io::Result<()> {
    stream.write_all(frame).await?;
    stream.flush().await
}

/// Read side of a connection: the stream half plus its framing state.
pub struct FrameReader {
    half: ReadHalf<BoxedStream>,
    codec: FrameCodec,
}

impl FrameReader {
    fn new(half: ReadHalf<BoxedStream>) -> Self {
        Self { half, codec: FrameCodec::new() }
    }

    /// Read the next complete message.
    ///
    /// # Errors
    ///
    /// Transport failures, end of stream and undecodable messages. The codec
    /// is reset in every case.
    pub async fn next_message(&mut self) -> Result<String, ReadFailure> {
        loop {
            let n = self.half.read(self.codec.read_buffer()).await?;
            if let Some(message) = self.codec.complete_read(n)? {
                return Ok(message);
            }
        }
    }

    async fn next_message_within(
        &mut self,
        limit: Option<Duration>,
    ) -> Result<String, ReadFailure> {
        match limit {
            None => self.next_message().await,
            Some(limit) => tokio::time::timeout(limit, self.next_message())
                .await
                .map_err(|_| ReadFailure::IdleTimeout(limit))?,
        }
    }
}

impl fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameReader").field("state", &self.codec.state()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
        sync::mpsc,
    };

    use super::*;
    use crate::error::FrameError;

    fn pair() -> (Connection, FrameReader, DuplexStream) {
        let (local, remote) = tokio::io::duplex(4096);
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let (connection, reader) =
            Connection::establish(SecureChannel::from_parts(local, addr, Vec::new()));
        (connection, reader, remote)
    }

    #[test]
    fn ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[tokio::test]
    async fn write_sends_message_bytes() {
        let (connection, _reader, mut remote) = pair();

        connection.write("hello").await.unwrap();

        let mut buf = [0_u8; 5];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn write_rejects_unframeable_messages() {
        let (connection, _reader, _remote) = pair();

        let err = connection.write("").await.unwrap_err();
        assert!(matches!(err, ConnectionError::Frame(FrameError::EmptyMessage)));

        let err = connection.write("x").await.unwrap_err();
        assert!(matches!(err, ConnectionError::Frame(FrameError::MessageTooShort { len: 1 })));

        let err = connection.write(&"y".repeat(2000)).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Frame(FrameError::MessageTooLarge { .. })));
    }

    #[tokio::test]
    async fn drive_delivers_messages_then_reports_closure() {
        let (connection, reader, mut remote) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let driver = connection.clone();
        let task = tokio::spawn(async move {
            driver.drive(reader, None, move |message| {
                let _ = tx.send(message);
            })
            .await
        });

        remote.write_all(b"first").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "first");

        remote.write_all("zweite Nachricht".as_bytes()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "zweite Nachricht");

        drop(remote);
        assert_eq!(task.await.unwrap(), DisconnectReason::ConnectionClosed);
    }

    #[tokio::test]
    async fn release_stops_read_loop_as_user_forced() {
        let (connection, reader, _remote) = pair();

        let driver = connection.clone();
        let task = tokio::spawn(async move { driver.drive(reader, None, |_| {}).await });

        assert!(connection.begin_dispose());
        connection.release().await;

        assert_eq!(task.await.unwrap(), DisconnectReason::UserForced);
        assert!(matches!(connection.write("late").await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn release_before_drive_is_not_lost() {
        let (connection, reader, _remote) = pair();

        assert!(connection.begin_dispose());
        connection.release().await;
        connection.release().await;

        let reason = connection.drive(reader, None, |_| {}).await;
        assert_eq!(reason, DisconnectReason::UserForced);
    }

    #[tokio::test]
    async fn release_interrupts_write_to_non_reading_peer() {
        let (local, _remote) = tokio::io::duplex(64);
        let addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let (connection, _reader) =
            Connection::establish(SecureChannel::from_parts(local, addr, Vec::new()));

        let writer = connection.clone();
        let stalled = tokio::spawn(async move { writer.write(&"a".repeat(1000)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stalled.is_finished());

        assert!(connection.begin_dispose());
        tokio::time::timeout(Duration::from_secs(3), connection.release())
            .await
            .expect("release waited on a stalled write");

        assert!(matches!(stalled.await.unwrap(), Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn cancel_stops_read_loop_without_disposing() {
        let (connection, reader, _remote) = pair();

        connection.cancel();
        assert_eq!(connection.drive(reader, None, |_| {}).await, DisconnectReason::UserForced);
        assert!(!connection.is_disposed());
        assert!(matches!(connection.write("after cancel").await, Err(ConnectionError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn write_within_times_out_on_non_reading_peer() {
        let (local, _remote) = tokio::io::duplex(64);
        let addr: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        let (connection, _reader) =
            Connection::establish(SecureChannel::from_parts(local, addr, Vec::new()));

        let limit = Duration::from_secs(2);
        let err = connection.write_within(&"b".repeat(1000), Some(limit)).await.unwrap_err();
        assert!(matches!(err, ConnectionError::TimedOut(d) if d == limit));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_ends_loop() {
        let (connection, reader, _remote) = pair();

        let reason = connection.drive(reader, Some(Duration::from_secs(10)), |_| {}).await;
        assert_eq!(reason, DisconnectReason::ConnectionClosed);
    }

    #[tokio::test]
    async fn invalid_utf8_closes_connection() {
        let (connection, reader, mut remote) = pair();

        remote.write_all(&[0xff, 0xfe, 0xfd]).await.unwrap();
        let reason = connection.drive(reader, None, |_| {}).await;
        assert_eq!(reason, DisconnectReason::ConnectionClosed);
    }
}
