//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use http::{Request, Response};
use tokio::io::DuplexStream;

use http11_negotiator::net::SocketWrapper;
use http11_negotiator::upgrade::{
    ExternalUpgradeHandler, InternalUpgradeHandler, SocketEvent, SocketState, WebConnection,
};
use http11_negotiator::{Adapter, Endpoint, Http11Protocol, NetEndpoint, UpgradeProtocolDescriptor};

/// Socket over an in-memory pipe, plus the client end of the pipe.
pub fn socket_pair() -> (Arc<SocketWrapper>, DuplexStream) {
    let (io, peer) = tokio::io::duplex(4096);
    (Arc::new(SocketWrapper::new(Box::new(io), None)), peer)
}

/// Same as [`socket_pair`], as if TLS had negotiated `alpn`.
pub fn tls_socket_pair(alpn: &str) -> (Arc<SocketWrapper>, DuplexStream) {
    let (io, peer) = tokio::io::duplex(4096);
    let socket = SocketWrapper::new(Box::new(io), None).with_tls(Some(alpn.to_string()));
    (Arc::new(socket), peer)
}

pub fn ok_adapter() -> Arc<dyn Adapter> {
    Arc::new(|_: &Request<()>| Response::new(()))
}

pub fn protocol(ssl_enabled: bool) -> Http11Protocol {
    let endpoint: Arc<dyn Endpoint> = Arc::new(NetEndpoint::new("it-endpoint", ssl_enabled));
    Http11Protocol::new(endpoint, ok_adapter())
}

/// Internal handler that counts the events it receives.
pub struct CountingHandler {
    pub events: Arc<AtomicUsize>,
}

impl InternalUpgradeHandler for CountingHandler {
    fn set_socket(&mut self, _socket: Arc<SocketWrapper>) {}

    fn upgrade_dispatch(&mut self, event: SocketEvent) -> SocketState {
        self.events.fetch_add(1, Ordering::SeqCst);
        match event {
            SocketEvent::Stop | SocketEvent::Disconnect | SocketEvent::Error => {
                SocketState::Closed
            }
            _ => SocketState::Long,
        }
    }
}

/// External handler that hands its connection to the test.
pub struct CapturingHandler {
    pub connections: Arc<Mutex<Vec<WebConnection>>>,
}

impl ExternalUpgradeHandler for CapturingHandler {
    fn init(&mut self, connection: WebConnection) {
        self.connections.lock().unwrap().push(connection);
    }
}

pub fn internal_descriptor(name: &str) -> UpgradeProtocolDescriptor {
    UpgradeProtocolDescriptor::internal(name, || {
        Box::new(CountingHandler {
            events: Arc::new(AtomicUsize::new(0)),
        })
    })
}

pub fn external_descriptor(
    name: &str,
    connections: Arc<Mutex<Vec<WebConnection>>>,
) -> UpgradeProtocolDescriptor {
    UpgradeProtocolDescriptor::external(name, move || {
        Box::new(CapturingHandler {
            connections: Arc::clone(&connections),
        })
    })
}
