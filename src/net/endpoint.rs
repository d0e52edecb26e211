//! Endpoint abstraction seen by the protocol handler.
//!
//! # Responsibilities
//! - Report whether the endpoint runs TLS and can negotiate ALPN
//! - Collect the ALPN names to advertise during the handshake
//!
//! The accept loop and raw socket I/O live behind this trait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// The part of an endpoint the protocol handler talks to.
pub trait Endpoint: Send + Sync {
    /// Name used in diagnostics, e.g. `"http-nio-8443"`.
    fn name(&self) -> &str;

    fn is_ssl_enabled(&self) -> bool;

    /// Whether this endpoint can negotiate application protocols via ALPN.
    fn is_alpn_supported(&self) -> bool;

    /// Add a protocol name to advertise during TLS negotiation.
    fn add_negotiated_protocol(&self, name: &str);

    /// Names advertised so far, in registration order.
    fn negotiated_protocols(&self) -> Vec<String>;

    /// ALPN list for a rustls `ServerConfig`: alternate protocols, then `http/1.1`.
    fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        let mut protocols: Vec<Vec<u8>> = self
            .negotiated_protocols()
            .into_iter()
            .map(String::into_bytes)
            .collect();
        protocols.push(b"http/1.1".to_vec());
        protocols
    }
}

/// rustls-backed endpoint description.
///
/// rustls always supports ALPN, so ALPN is available exactly when TLS is on.
#[derive(Debug)]
pub struct NetEndpoint {
    name: String,
    ssl_enabled: AtomicBool,
    negotiated: Mutex<Vec<String>>,
}

impl NetEndpoint {
    pub fn new(name: impl Into<String>, ssl_enabled: bool) -> Self {
        Self {
            name: name.into(),
            ssl_enabled: AtomicBool::new(ssl_enabled),
            negotiated: Mutex::new(Vec::new()),
        }
    }

    pub fn set_ssl_enabled(&self, enabled: bool) {
        self.ssl_enabled.store(enabled, Ordering::Release);
    }
}

impl Endpoint for NetEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ssl_enabled(&self) -> bool {
        self.ssl_enabled.load(Ordering::Acquire)
    }

    fn is_alpn_supported(&self) -> bool {
        self.is_ssl_enabled()
    }

    fn add_negotiated_protocol(&self, name: &str) {
        let mut negotiated = self
            .negotiated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !negotiated.iter().any(|existing| existing == name) {
            negotiated.push(name.to_string());
        }
    }

    fn negotiated_protocols(&self) -> Vec<String> {
        self.negotiated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
