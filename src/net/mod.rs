//! Network-facing collaborators of the protocol handler.
//!
//! # Data Flow
//! ```text
//! Accepted TCP connection (endpoint, external)
//!     → tls.rs / identity.rs (pick host identity by SNI, build rustls config)
//!     → endpoint.rs (ALPN names advertised during the handshake)
//!     → connection.rs (SocketWrapper handed to a processor)
//! ```
//!
//! # Design Decisions
//! - The accept loop stays outside; this layer only describes it
//! - TLS identities are shared `Arc`s so renames reach every holder
//! - The default identity is resolved lazily, exactly once

pub mod connection;
pub mod endpoint;
pub mod identity;
pub mod tls;

pub use connection::{ConnectionId, SocketWrapper};
pub use endpoint::{Endpoint, NetEndpoint};
pub use identity::TlsIdentityResolver;
pub use tls::{TlsError, TlsHostConfig, TlsHostSettings};
