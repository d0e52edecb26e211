//! Alternate protocol registry and negotiation lookups.
//!
//! # Responsibilities
//! - Keep registered protocols in insertion order (source of truth)
//! - Derive the ALPN-name and Upgrade-token maps at startup
//! - Report protocols that cannot be reached on the endpoint
//!
//! # Design Decisions
//! - Maps are rebuilt from the ordered list, never edited on their own
//! - The two maps are independent namespaces; last registration wins a key
//! - Lookups are exact, case-sensitive, and a miss is `None`, not an error
//! - Immutable after startup, so runtime lookups take no locks

use std::collections::HashMap;
use std::sync::Arc;

use crate::net::Endpoint;
use crate::observability::metrics;
use crate::upgrade::protocol::UpgradeProtocol;

/// Read side used by the endpoint at handshake and request time.
pub trait NegotiationResolver {
    /// Protocol selected through TLS ALPN.
    fn resolve_by_alpn_name(&self, name: &str) -> Option<Arc<dyn UpgradeProtocol>>;

    /// Protocol named by an HTTP `Upgrade` token.
    fn resolve_by_upgrade_token(&self, token: &str) -> Option<Arc<dyn UpgradeProtocol>>;
}

/// A protocol that was configured for ALPN on an endpoint that cannot
/// negotiate ALPN and has no Upgrade name to fall back on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDiagnostic {
    pub protocol: String,
    pub alpn_name: String,
    pub endpoint: String,
}

impl std::fmt::Display for ConfigDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "protocol {} (ALPN name {}) is unreachable on endpoint {}: ALPN is not supported and no HTTP upgrade name is configured",
            self.protocol, self.alpn_name, self.endpoint
        )
    }
}

/// Ordered alternate protocols plus the two derived lookup maps.
#[derive(Default)]
pub struct ProtocolRegistry {
    protocols: Vec<Arc<dyn UpgradeProtocol>>,
    by_alpn_name: HashMap<String, Arc<dyn UpgradeProtocol>>,
    by_upgrade_token: HashMap<String, Arc<dyn UpgradeProtocol>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a protocol. No deduplication happens here.
    pub fn register(&mut self, protocol: Arc<dyn UpgradeProtocol>) {
        self.protocols.push(protocol);
    }

    /// Registered protocols, in registration order.
    pub fn protocols(&self) -> &[Arc<dyn UpgradeProtocol>] {
        &self.protocols
    }

    pub fn alpn_names(&self) -> Vec<&str> {
        self.by_alpn_name.keys().map(String::as_str).collect()
    }

    pub fn upgrade_tokens(&self) -> Vec<&str> {
        self.by_upgrade_token.keys().map(String::as_str).collect()
    }

    /// Derive the lookup maps for `endpoint` and advertise ALPN names on it.
    ///
    /// Returns one diagnostic per protocol that ends up unreachable because
    /// it only has an ALPN name and the endpoint cannot negotiate ALPN.
    /// Protocols with neither name are skipped silently.
    pub fn configure_at_startup(&mut self, endpoint: &dyn Endpoint) -> Vec<ConfigDiagnostic> {
        self.by_alpn_name.clear();
        self.by_upgrade_token.clear();

        let secure = endpoint.is_ssl_enabled();
        let alpn_supported = endpoint.is_alpn_supported();
        let mut diagnostics = Vec::new();

        for protocol in &self.protocols {
            let mut upgrade_reachable = false;
            if let Some(token) = protocol.http_upgrade_name(secure).filter(|t| !t.is_empty()) {
                self.by_upgrade_token
                    .insert(token.to_string(), Arc::clone(protocol));
                upgrade_reachable = true;
                tracing::info!(
                    endpoint = %endpoint.name(),
                    protocol = %protocol.name(),
                    upgrade = %token,
                    "HTTP upgrade protocol configured"
                );
            }

            let Some(alpn) = protocol.alpn_name().filter(|n| !n.is_empty()) else {
                continue;
            };
            if alpn_supported {
                self.by_alpn_name.insert(alpn.to_string(), Arc::clone(protocol));
                endpoint.add_negotiated_protocol(alpn);
                tracing::info!(
                    endpoint = %endpoint.name(),
                    protocol = %protocol.name(),
                    alpn = %alpn,
                    "ALPN protocol configured"
                );
            } else if !upgrade_reachable {
                let diagnostic = ConfigDiagnostic {
                    protocol: protocol.name().to_string(),
                    alpn_name: alpn.to_string(),
                    endpoint: endpoint.name().to_string(),
                };
                tracing::error!(
                    endpoint = %diagnostic.endpoint,
                    protocol = %diagnostic.protocol,
                    alpn = %diagnostic.alpn_name,
                    "{}",
                    diagnostic
                );
                metrics::record_unreachable_protocol();
                diagnostics.push(diagnostic);
            }
        }

        diagnostics
    }
}

impl NegotiationResolver for ProtocolRegistry {
    fn resolve_by_alpn_name(&self, name: &str) -> Option<Arc<dyn UpgradeProtocol>> {
        let found = self.by_alpn_name.get(name).cloned();
        metrics::record_negotiation("alpn", found.is_some());
        if found.is_none() {
            tracing::debug!(alpn = %name, "No protocol for ALPN name");
        }
        found
    }

    fn resolve_by_upgrade_token(&self, token: &str) -> Option<Arc<dyn UpgradeProtocol>> {
        let found = self.by_upgrade_token.get(token).cloned();
        metrics::record_negotiation("upgrade", found.is_some());
        if found.is_none() {
            tracing::debug!(upgrade = %token, "No protocol for upgrade token");
        }
        found
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field(
                "protocols",
                &self.protocols.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("alpn_names", &self.alpn_names())
            .field("upgrade_tokens", &self.upgrade_tokens())
            .finish()
    }
}
