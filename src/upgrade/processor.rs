//! Processors for upgraded connections.
//!
//! [`UpgradeProcessorInternal`] forwards socket events straight to the
//! handler. [`UpgradeProcessorExternal`] gives the handler a
//! [`WebConnection`] stream facade over the same socket.

use std::io;
use std::sync::Arc;

use crate::net::connection::INFINITE_TIMEOUT;
use crate::net::SocketWrapper;
use crate::upgrade::handler::{
    ExternalUpgradeHandler, InternalUpgradeHandler, SocketEvent, SocketState,
};

/// Adapter for handlers that run inside the server's event-driven I/O.
pub struct UpgradeProcessorInternal {
    socket: Arc<SocketWrapper>,
    protocol: String,
    handler: Box<dyn InternalUpgradeHandler>,
}

impl UpgradeProcessorInternal {
    pub fn new(
        socket: Arc<SocketWrapper>,
        protocol: String,
        mut handler: Box<dyn InternalUpgradeHandler>,
    ) -> Self {
        handler.set_socket(Arc::clone(&socket));
        Self {
            socket,
            protocol,
            handler,
        }
    }

    pub fn socket(&self) -> &Arc<SocketWrapper> {
        &self.socket
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Deliver one socket event to the handler.
    pub fn dispatch(&mut self, event: SocketEvent) -> SocketState {
        let state = self.handler.upgrade_dispatch(event);
        tracing::trace!(
            connection_id = %self.socket.id(),
            protocol = %self.protocol,
            ?event,
            ?state,
            "Internal upgrade dispatch"
        );
        state
    }

    pub fn pause(&mut self) {
        self.handler.pause();
    }

    pub fn destroy(&mut self) {
        self.handler.destroy();
    }
}

/// Adapter for handlers that expect a plain stream.
pub struct UpgradeProcessorExternal {
    socket: Arc<SocketWrapper>,
    protocol: String,
    handler: Box<dyn ExternalUpgradeHandler>,
    started: bool,
}

impl UpgradeProcessorExternal {
    /// The handler owns the connection's pacing, so socket timeouts are lifted.
    pub fn new(
        socket: Arc<SocketWrapper>,
        protocol: String,
        handler: Box<dyn ExternalUpgradeHandler>,
    ) -> Self {
        socket.set_read_timeout(INFINITE_TIMEOUT);
        socket.set_write_timeout(INFINITE_TIMEOUT);
        Self {
            socket,
            protocol,
            handler,
            started: false,
        }
    }

    pub fn socket(&self) -> &Arc<SocketWrapper> {
        &self.socket
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Hand the connection facade to the handler. Later calls do nothing.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.handler.init(WebConnection::new(Arc::clone(&self.socket)));
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn destroy(&mut self) {
        self.handler.destroy();
    }
}

impl std::fmt::Debug for UpgradeProcessorInternal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeProcessorInternal")
            .field("socket", &self.socket)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for UpgradeProcessorExternal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeProcessorExternal")
            .field("socket", &self.socket)
            .field("protocol", &self.protocol)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

/// Read/write facade over an upgraded socket.
#[derive(Debug, Clone)]
pub struct WebConnection {
    socket: Arc<SocketWrapper>,
}

impl WebConnection {
    pub fn new(socket: Arc<SocketWrapper>) -> Self {
        Self { socket }
    }

    pub fn socket(&self) -> &Arc<SocketWrapper> {
        &self.socket
    }

    /// Read into `buf`, bounded by the socket's current read timeout.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.socket.read_deadline() {
            Some(limit) => tokio::time::timeout(limit, self.socket.read(buf))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))?,
            None => self.socket.read(buf).await,
        }
    }

    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.socket.write_all(buf).await
    }

    pub async fn flush(&self) -> io::Result<()> {
        self.socket.flush().await
    }

    /// Close the connection, failing any read still pending on it.
    pub async fn close(&self) {
        self.socket.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<SocketEvent>>>,
        socket: Option<Arc<SocketWrapper>>,
    }

    impl InternalUpgradeHandler for Recorder {
        fn set_socket(&mut self, socket: Arc<SocketWrapper>) {
            self.socket = Some(socket);
        }

        fn upgrade_dispatch(&mut self, event: SocketEvent) -> SocketState {
            self.events.lock().unwrap().push(event);
            match event {
                SocketEvent::Stop | SocketEvent::Disconnect => SocketState::Closed,
                _ => SocketState::Long,
            }
        }
    }

    struct Capture(Arc<Mutex<Vec<WebConnection>>>);

    impl ExternalUpgradeHandler for Capture {
        fn init(&mut self, connection: WebConnection) {
            self.0.lock().unwrap().push(connection);
        }
    }

    fn socket() -> (Arc<SocketWrapper>, tokio::io::DuplexStream) {
        let (io, peer) = tokio::io::duplex(1024);
        (Arc::new(SocketWrapper::new(Box::new(io), None)), peer)
    }

    #[test]
    fn internal_forwards_events() {
        let (socket, _peer) = socket();
        let events = Arc::new(Mutex::new(Vec::new()));
        let handler = Recorder {
            events: Arc::clone(&events),
            socket: None,
        };
        let mut processor =
            UpgradeProcessorInternal::new(Arc::clone(&socket), "x".into(), Box::new(handler));

        assert_eq!(processor.dispatch(SocketEvent::OpenRead), SocketState::Long);
        assert_eq!(processor.dispatch(SocketEvent::Stop), SocketState::Closed);
        assert_eq!(
            *events.lock().unwrap(),
            vec![SocketEvent::OpenRead, SocketEvent::Stop]
        );
        assert_eq!(processor.socket().id(), socket.id());
    }

    #[test]
    fn external_initializes_once_and_lifts_timeouts() {
        let (socket, _peer) = socket();
        socket.set_read_timeout(20_000);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut processor = UpgradeProcessorExternal::new(
            Arc::clone(&socket),
            "y".into(),
            Box::new(Capture(Arc::clone(&seen))),
        );
        assert_eq!(socket.read_timeout(), INFINITE_TIMEOUT);
        assert_eq!(socket.write_timeout(), INFINITE_TIMEOUT);

        processor.start();
        processor.start();
        assert!(processor.is_started());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn web_connection_round_trip() {
        let (socket, mut peer) = socket();
        let connection = WebConnection::new(socket);

        connection.write_all(b"ping").await.unwrap();
        connection.flush().await.unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").await.unwrap();
        let n = connection.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[tokio::test]
    async fn web_connection_read_times_out() {
        let (socket, _peer) = socket();
        socket.set_read_timeout(20);
        let connection = WebConnection::new(socket);
        let mut buf = [0u8; 8];
        let err = tokio::time::timeout(Duration::from_secs(5), connection.read(&mut buf))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn web_connection_after_close() {
        let (socket, _peer) = socket();
        let connection = WebConnection::new(socket);
        connection.close().await;
        let err = connection.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn duplex_traffic_after_external_start() {
        let (socket, mut peer) = socket();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut processor = UpgradeProcessorExternal::new(
            Arc::clone(&socket),
            "ws".into(),
            Box::new(Capture(Arc::clone(&seen))),
        );
        processor.start();
        let connection = seen.lock().unwrap().pop().unwrap();

        let pending_read = {
            let connection = connection.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 8];
                connection.read(&mut buf).await
            })
        };
        tokio::task::yield_now().await;

        tokio::time::timeout(Duration::from_secs(2), connection.write_all(b"ping"))
            .await
            .expect("write held up by the pending read")
            .unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        tokio::time::timeout(Duration::from_secs(2), connection.close())
            .await
            .expect("close held up by the pending read");
        let err = pending_read.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
