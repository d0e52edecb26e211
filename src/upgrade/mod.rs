//! Alternate protocol negotiation subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     protocol.rs descriptors
//!     → registry.rs register (ordered list)
//!     → configure_at_startup (derive ALPN + Upgrade maps, advertise ALPN)
//!
//! Per connection:
//!     TLS handshake ALPN name  → resolve_by_alpn_name
//!     Upgrade request header   → resolve_by_upgrade_token
//!     → UpgradeProtocol::create_token
//!     → processor.rs (internal or external adapter, chosen by handler kind)
//! ```

pub mod handler;
pub mod processor;
pub mod protocol;
pub mod registry;

pub use handler::{
    ExternalUpgradeHandler, HandlerKind, InternalUpgradeHandler, SocketEvent, SocketState,
    UpgradeHandler, UpgradeToken,
};
pub use processor::{UpgradeProcessorExternal, UpgradeProcessorInternal, WebConnection};
pub use protocol::{HandlerFactory, UpgradeProtocol, UpgradeProtocolDescriptor};
pub use registry::{ConfigDiagnostic, NegotiationResolver, ProtocolRegistry};
