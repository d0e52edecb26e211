//! HTTP/1.1 protocol negotiation and processor dispatch.
//!
//! For every accepted connection the endpoint asks an [`Http11Protocol`]
//! which protocol runs on it (plain HTTP/1.1, or an alternate protocol
//! reached through TLS ALPN or an HTTP `Upgrade`) and gets back the
//! configured processor that drives it.

pub mod config;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod upgrade;

pub use config::schema::ServerConfig;
pub use net::{Endpoint, NetEndpoint, SocketWrapper};
pub use protocol::{Adapter, Http11Protocol, OperationalLimits, Processor, ProcessorFactory};
pub use upgrade::{
    ConfigDiagnostic, HandlerKind, NegotiationResolver, UpgradeProtocol,
    UpgradeProtocolDescriptor, UpgradeToken,
};
