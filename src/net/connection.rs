//! Per-connection socket handle.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Carry the connection-scoped timeouts a processor enacts
//! - Own the byte stream handed over by the endpoint
//!
//! # Design Decisions
//! - Timeouts are plain milliseconds; zero or negative means "no timeout"
//!   and is stored verbatim
//! - The socket is shared via `Arc` between the endpoint and one processor
//! - The stream is split into read and write halves with separate locks, so
//!   a pending read never holds up a write
//! - `close` wakes pending I/O instead of waiting behind it

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf,
};
use tokio::sync::{Mutex, Notify};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Timeout value meaning "wait forever".
pub const INFINITE_TIMEOUT: i64 = -1;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Byte stream behind a socket.
pub trait SocketIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SocketIo for T {}

/// Boxed stream as stored in a [`SocketWrapper`].
pub type BoxedIo = Box<dyn SocketIo>;

/// Connection handle passed from the endpoint to processors.
pub struct SocketWrapper {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    secure: bool,
    negotiated_protocol: Option<String>,
    read_timeout_ms: AtomicI64,
    write_timeout_ms: AtomicI64,
    closed: AtomicBool,
    close_signal: Notify,
    reader: Mutex<Option<ReadHalf<BoxedIo>>>,
    writer: Mutex<Option<WriteHalf<BoxedIo>>>,
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket closed")
}

impl SocketWrapper {
    /// Wrap a freshly accepted stream.
    pub fn new(io: BoxedIo, peer_addr: Option<SocketAddr>) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self {
            id: ConnectionId::new(),
            peer_addr,
            secure: false,
            negotiated_protocol: None,
            read_timeout_ms: AtomicI64::new(INFINITE_TIMEOUT),
            write_timeout_ms: AtomicI64::new(INFINITE_TIMEOUT),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Mark the socket as TLS-protected, recording the ALPN result if any.
    pub fn with_tls(mut self, negotiated_protocol: Option<String>) -> Self {
        self.secure = true;
        self.negotiated_protocol = negotiated_protocol;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Application protocol agreed during the TLS handshake.
    pub fn negotiated_protocol(&self) -> Option<&str> {
        self.negotiated_protocol.as_deref()
    }

    pub fn read_timeout(&self) -> i64 {
        self.read_timeout_ms.load(Ordering::Acquire)
    }

    pub fn set_read_timeout(&self, millis: i64) {
        self.read_timeout_ms.store(millis, Ordering::Release);
    }

    pub fn write_timeout(&self) -> i64 {
        self.write_timeout_ms.load(Ordering::Acquire)
    }

    pub fn set_write_timeout(&self, millis: i64) {
        self.write_timeout_ms.store(millis, Ordering::Release);
    }

    /// Current read timeout as a `Duration`, `None` when unbounded.
    pub fn read_deadline(&self) -> Option<Duration> {
        timeout_duration(self.read_timeout())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the socket. Pending reads and writes fail with `NotConnected`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_signal.notify_waiters();
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::trace!(connection_id = %self.id, error = %e, "Shutdown on close failed");
            }
        }
        // A reader still parked on the lock drops its half once it wakes.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        tracing::trace!(connection_id = %self.id, "Socket closed");
    }

    /// Read into `buf`. Only one read runs at a time; writes proceed alongside.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.reader.lock().await;
        let closing = self.close_signal.notified();
        tokio::pin!(closing);
        closing.as_mut().enable();
        if self.is_closed() {
            guard.take();
            return Err(not_connected());
        }
        let half = guard.as_mut().ok_or_else(not_connected)?;
        let outcome = tokio::select! {
            result = half.read(buf) => Some(result),
            _ = &mut closing => None,
        };
        match outcome {
            Some(result) => result,
            None => {
                guard.take();
                Err(not_connected())
            }
        }
    }

    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        let closing = self.close_signal.notified();
        tokio::pin!(closing);
        closing.as_mut().enable();
        if self.is_closed() {
            return Err(not_connected());
        }
        let half = guard.as_mut().ok_or_else(not_connected)?;
        tokio::select! {
            result = half.write_all(buf) => result,
            _ = &mut closing => Err(not_connected()),
        }
    }

    pub async fn flush(&self) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        if self.is_closed() {
            return Err(not_connected());
        }
        let half = guard.as_mut().ok_or_else(not_connected)?;
        half.flush().await
    }
}

impl std::fmt::Debug for SocketWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketWrapper")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("secure", &self.secure)
            .field("negotiated_protocol", &self.negotiated_protocol)
            .field("read_timeout_ms", &self.read_timeout())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Convert a millisecond timeout into a `Duration`; non-positive values mean none.
pub fn timeout_duration(millis: i64) -> Option<Duration> {
    u64::try_from(millis)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn timeouts_keep_sentinels() {
        let (io, _peer) = tokio::io::duplex(64);
        let socket = SocketWrapper::new(Box::new(io), None);
        assert_eq!(socket.read_timeout(), INFINITE_TIMEOUT);
        assert!(socket.read_deadline().is_none());

        socket.set_read_timeout(0);
        assert_eq!(socket.read_timeout(), 0);
        assert!(socket.read_deadline().is_none());

        socket.set_read_timeout(1500);
        assert_eq!(socket.read_deadline(), Some(Duration::from_millis(1500)));
    }

    #[tokio::test]
    async fn close_rejects_further_io() {
        let (io, _peer) = tokio::io::duplex(64);
        let socket = SocketWrapper::new(Box::new(io), None);
        socket.close().await;
        assert!(socket.is_closed());
        let mut buf = [0u8; 4];
        assert_eq!(
            socket.read(&mut buf).await.unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert_eq!(
            socket.write_all(b"x").await.unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }

    #[tokio::test]
    async fn write_proceeds_while_read_pending() {
        let (io, mut peer) = tokio::io::duplex(64);
        let socket = std::sync::Arc::new(SocketWrapper::new(Box::new(io), None));

        let reader = {
            let socket = std::sync::Arc::clone(&socket);
            tokio::spawn(async move {
                let mut buf = [0u8; 4];
                let n = socket.read(&mut buf).await.unwrap();
                buf[..n].to_vec()
            })
        };
        tokio::task::yield_now().await;

        tokio::time::timeout(Duration::from_secs(2), socket.write_all(b"ping"))
            .await
            .expect("write held up by the pending read")
            .unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").await.unwrap();
        assert_eq!(reader.await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn close_wakes_pending_read() {
        let (io, _peer) = tokio::io::duplex(64);
        let socket = std::sync::Arc::new(SocketWrapper::new(Box::new(io), None));

        let reader = {
            let socket = std::sync::Arc::clone(&socket);
            tokio::spawn(async move {
                let mut buf = [0u8; 4];
                socket.read(&mut buf).await
            })
        };
        tokio::task::yield_now().await;

        tokio::time::timeout(Duration::from_secs(2), socket.close())
            .await
            .expect("close held up by the pending read");
        let err = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("pending read not woken")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
