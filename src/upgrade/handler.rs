//! Upgrade handlers and the token that carries one into a processor.
//!
//! Handlers come in two kinds. Internal handlers run inside the server's own
//! event-driven I/O and are fed socket events. External handlers expect a
//! plain read/write stream facade. The kind is part of the handler's type,
//! so processor selection never inspects anything at runtime.

use std::sync::Arc;

use crate::net::SocketWrapper;
use crate::upgrade::processor::WebConnection;

/// Declared execution model of an upgrade handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Internal,
    External,
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerKind::Internal => f.write_str("internal"),
            HandlerKind::External => f.write_str("external"),
        }
    }
}

/// Socket readiness events delivered to internal handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    OpenRead,
    OpenWrite,
    Timeout,
    Stop,
    Disconnect,
    Error,
}

/// What the endpoint should do with the socket after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Keep the connection and wait for the next event.
    Long,
    /// Keep the connection open, more data may already be buffered.
    Open,
    Closed,
}

/// Handler driven directly by socket events.
pub trait InternalUpgradeHandler: Send {
    /// Called once, before the first event.
    fn set_socket(&mut self, socket: Arc<SocketWrapper>);

    fn upgrade_dispatch(&mut self, event: SocketEvent) -> SocketState;

    fn pause(&mut self) {}

    fn destroy(&mut self) {}
}

/// Handler that consumes a stream facade over the upgraded connection.
pub trait ExternalUpgradeHandler: Send {
    /// Called exactly once with the connection facade.
    fn init(&mut self, connection: WebConnection);

    fn destroy(&mut self) {}
}

/// A handler tagged with its kind.
pub enum UpgradeHandler {
    Internal(Box<dyn InternalUpgradeHandler>),
    External(Box<dyn ExternalUpgradeHandler>),
}

impl UpgradeHandler {
    pub fn kind(&self) -> HandlerKind {
        match self {
            UpgradeHandler::Internal(_) => HandlerKind::Internal,
            UpgradeHandler::External(_) => HandlerKind::External,
        }
    }
}

impl std::fmt::Debug for UpgradeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("UpgradeHandler").field(&self.kind()).finish()
    }
}

/// Everything a processor needs to take over an upgraded connection.
#[derive(Debug)]
pub struct UpgradeToken {
    protocol: String,
    handler: UpgradeHandler,
}

impl UpgradeToken {
    pub fn new(protocol: impl Into<String>, handler: UpgradeHandler) -> Self {
        Self {
            protocol: protocol.into(),
            handler,
        }
    }

    /// Protocol name the connection switched to.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn handler_kind(&self) -> HandlerKind {
        self.handler.kind()
    }

    pub fn into_parts(self) -> (String, UpgradeHandler) {
        (self.protocol, self.handler)
    }
}
