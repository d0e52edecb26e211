//! Alternate protocol descriptors.

use std::sync::Arc;

use http::request::Parts;

use crate::upgrade::handler::{
    ExternalUpgradeHandler, HandlerKind, InternalUpgradeHandler, UpgradeHandler, UpgradeToken,
};

/// An alternate protocol reachable via ALPN and/or HTTP Upgrade.
pub trait UpgradeProtocol: Send + Sync {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Token accepted in the `Upgrade` request header. `secure` tells whether
    /// the endpoint runs TLS.
    fn http_upgrade_name(&self, secure: bool) -> Option<&str>;

    /// Identifier negotiated through TLS ALPN.
    fn alpn_name(&self) -> Option<&str>;

    fn handler_kind(&self) -> HandlerKind;

    /// Whether this protocol takes over the given upgrade request.
    fn accept(&self, _request: &Parts) -> bool {
        true
    }

    /// Create a fresh handler for one connection.
    fn create_token(&self) -> UpgradeToken;
}

type InternalFactory = Arc<dyn Fn() -> Box<dyn InternalUpgradeHandler> + Send + Sync>;
type ExternalFactory = Arc<dyn Fn() -> Box<dyn ExternalUpgradeHandler> + Send + Sync>;

/// Handler factory tagged with the kind of handler it produces.
#[derive(Clone)]
pub enum HandlerFactory {
    Internal(InternalFactory),
    External(ExternalFactory),
}

impl HandlerFactory {
    pub fn kind(&self) -> HandlerKind {
        match self {
            HandlerFactory::Internal(_) => HandlerKind::Internal,
            HandlerFactory::External(_) => HandlerKind::External,
        }
    }

    fn create(&self) -> UpgradeHandler {
        match self {
            HandlerFactory::Internal(f) => UpgradeHandler::Internal(f()),
            HandlerFactory::External(f) => UpgradeHandler::External(f()),
        }
    }
}

/// Data-driven [`UpgradeProtocol`].
///
/// ```ignore
/// let h2 = UpgradeProtocolDescriptor::internal("http2", || Box::new(Http2Handler::new()))
///     .with_alpn_name("h2")
///     .with_http_upgrade_name("h2c")
///     .cleartext_upgrade_only();
/// ```
#[derive(Clone)]
pub struct UpgradeProtocolDescriptor {
    name: String,
    http_upgrade_name: Option<String>,
    cleartext_upgrade_only: bool,
    alpn_name: Option<String>,
    factory: HandlerFactory,
}

impl UpgradeProtocolDescriptor {
    pub fn new(name: impl Into<String>, factory: HandlerFactory) -> Self {
        Self {
            name: name.into(),
            http_upgrade_name: None,
            cleartext_upgrade_only: false,
            alpn_name: None,
            factory,
        }
    }

    pub fn internal<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn InternalUpgradeHandler> + Send + Sync + 'static,
    {
        Self::new(name, HandlerFactory::Internal(Arc::new(factory)))
    }

    pub fn external<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ExternalUpgradeHandler> + Send + Sync + 'static,
    {
        Self::new(name, HandlerFactory::External(Arc::new(factory)))
    }

    pub fn with_http_upgrade_name(mut self, name: impl Into<String>) -> Self {
        self.http_upgrade_name = Some(name.into());
        self
    }

    /// Offer the upgrade name only on cleartext endpoints (e.g. `h2c`).
    pub fn cleartext_upgrade_only(mut self) -> Self {
        self.cleartext_upgrade_only = true;
        self
    }

    pub fn with_alpn_name(mut self, name: impl Into<String>) -> Self {
        self.alpn_name = Some(name.into());
        self
    }
}

impl UpgradeProtocol for UpgradeProtocolDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn http_upgrade_name(&self, secure: bool) -> Option<&str> {
        if secure && self.cleartext_upgrade_only {
            return None;
        }
        self.http_upgrade_name.as_deref()
    }

    fn alpn_name(&self) -> Option<&str> {
        self.alpn_name.as_deref()
    }

    fn handler_kind(&self) -> HandlerKind {
        self.factory.kind()
    }

    fn create_token(&self) -> UpgradeToken {
        let protocol = self
            .http_upgrade_name
            .as_deref()
            .or(self.alpn_name.as_deref())
            .unwrap_or(&self.name);
        UpgradeToken::new(protocol, self.factory.create())
    }
}

impl std::fmt::Debug for UpgradeProtocolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeProtocolDescriptor")
            .field("name", &self.name)
            .field("http_upgrade_name", &self.http_upgrade_name)
            .field("cleartext_upgrade_only", &self.cleartext_upgrade_only)
            .field("alpn_name", &self.alpn_name)
            .field("kind", &self.factory.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::SocketWrapper;
    use crate::upgrade::handler::{SocketEvent, SocketState};
    use crate::upgrade::processor::WebConnection;

    struct Noop;

    impl InternalUpgradeHandler for Noop {
        fn set_socket(&mut self, _socket: Arc<SocketWrapper>) {}
        fn upgrade_dispatch(&mut self, _event: SocketEvent) -> SocketState {
            SocketState::Closed
        }
    }

    impl ExternalUpgradeHandler for Noop {
        fn init(&mut self, _connection: WebConnection) {}
    }

    #[test]
    fn kind_follows_factory() {
        let internal = UpgradeProtocolDescriptor::internal("x", || Box::new(Noop));
        let external = UpgradeProtocolDescriptor::external("y", || Box::new(Noop));
        assert_eq!(internal.handler_kind(), HandlerKind::Internal);
        assert_eq!(external.handler_kind(), HandlerKind::External);
        assert_eq!(internal.create_token().handler_kind(), HandlerKind::Internal);
        assert_eq!(external.create_token().handler_kind(), HandlerKind::External);
    }

    #[test]
    fn cleartext_only_upgrade_name() {
        let h2 = UpgradeProtocolDescriptor::internal("http2", || Box::new(Noop))
            .with_http_upgrade_name("h2c")
            .cleartext_upgrade_only()
            .with_alpn_name("h2");
        assert_eq!(h2.http_upgrade_name(false), Some("h2c"));
        assert_eq!(h2.http_upgrade_name(true), None);
        assert_eq!(h2.alpn_name(), Some("h2"));
        assert_eq!(h2.create_token().protocol(), "h2c");
    }

    #[test]
    fn token_falls_back_to_alpn_then_name() {
        let alpn_only = UpgradeProtocolDescriptor::external("acme", || Box::new(Noop))
            .with_alpn_name("acme-tls/1");
        assert_eq!(alpn_only.create_token().protocol(), "acme-tls/1");
        let bare = UpgradeProtocolDescriptor::external("bare", || Box::new(Noop));
        assert_eq!(bare.create_token().protocol(), "bare");
    }
}
