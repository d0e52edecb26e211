//! Default TLS identity resolution and per-host lookup.
//!
//! # State Machine
//! ```text
//! Unresolved ──(first accessor call)──▶ Resolved (terminal)
//! ```
//! On first access the configured identities are scanned for one whose host
//! name equals the default host name. If none matches, a blank identity with
//! that name is fabricated and added to the set. The scan runs at most once,
//! guarded by a `OnceLock`; concurrent first callers block until it finishes
//! and then observe the same `Arc`.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::net::tls::{TlsError, TlsHostConfig, DEFAULT_HOST_NAME};

/// Identity set of one endpoint plus its lazily resolved default.
#[derive(Debug)]
pub struct TlsIdentityResolver {
    /// Explicitly configured identities, in registration order.
    hosts: RwLock<Vec<Arc<TlsHostConfig>>>,
    default_host_name: RwLock<String>,
    default_identity: OnceLock<Arc<TlsHostConfig>>,
}

impl Default for TlsIdentityResolver {
    fn default() -> Self {
        Self::new(DEFAULT_HOST_NAME)
    }
}

impl TlsIdentityResolver {
    pub fn new(default_host_name: impl Into<String>) -> Self {
        Self {
            hosts: RwLock::new(Vec::new()),
            default_host_name: RwLock::new(default_host_name.into()),
            default_identity: OnceLock::new(),
        }
    }

    /// Register a per-host identity. Host names are unique, ignoring case.
    pub fn add_host(&self, identity: Arc<TlsHostConfig>) -> Result<(), TlsError> {
        let host_name = identity.host_name();
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        if hosts
            .iter()
            .any(|existing| existing.host_name().eq_ignore_ascii_case(&host_name))
        {
            return Err(TlsError::DuplicateHost(host_name));
        }
        tracing::debug!(host = %host_name, "TLS host identity added");
        hosts.push(identity);
        Ok(())
    }

    /// Snapshot of the identity set.
    pub fn hosts(&self) -> Vec<Arc<TlsHostConfig>> {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn default_host_name(&self) -> String {
        self.default_host_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rename the default host. An already resolved identity is renamed too.
    pub fn set_default_host_name(&self, host_name: impl Into<String>) {
        let host_name = host_name.into();
        *self
            .default_host_name
            .write()
            .unwrap_or_else(PoisonError::into_inner) = host_name.clone();
        if let Some(identity) = self.default_identity.get() {
            identity.set_host_name(host_name);
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.default_identity.get().is_some()
    }

    /// The default identity, resolving it on first call.
    pub fn default_identity(&self) -> &Arc<TlsHostConfig> {
        self.default_identity.get_or_init(|| self.resolve_default())
    }

    fn resolve_default(&self) -> Arc<TlsHostConfig> {
        let default_name = self.default_host_name();
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = hosts
            .iter()
            .find(|identity| identity.host_name().eq_ignore_ascii_case(&default_name))
        {
            tracing::info!(host = %default_name, "Default TLS identity adopted");
            return Arc::clone(existing);
        }

        let fabricated = Arc::new(TlsHostConfig::blank(default_name.clone()));
        hosts.push(Arc::clone(&fabricated));
        tracing::info!(host = %default_name, "Default TLS identity created");
        fabricated
    }

    /// Identity for an SNI host name: exact match, then `*.` wildcard on the
    /// first label, then the default identity.
    pub fn lookup(&self, sni_host: Option<&str>) -> Arc<TlsHostConfig> {
        if let Some(sni) = sni_host.map(str::to_ascii_lowercase) {
            let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
            let matches = |name: &str| {
                hosts
                    .iter()
                    .find(|h| h.host_name().to_ascii_lowercase() == name)
                    .cloned()
            };

            if let Some(identity) = matches(&sni) {
                return identity;
            }
            if let Some((_, parent)) = sni.split_once('.') {
                if let Some(identity) = matches(&format!("*.{parent}")) {
                    return identity;
                }
            }
        }
        Arc::clone(self.default_identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adopts_configured_identity() {
        let resolver = TlsIdentityResolver::new("www.example.org");
        let configured = Arc::new(TlsHostConfig::blank("www.example.org"));
        resolver.add_host(Arc::clone(&configured)).unwrap();

        assert!(!resolver.is_resolved());
        assert!(Arc::ptr_eq(resolver.default_identity(), &configured));
        assert_eq!(resolver.hosts().len(), 1);
    }

    #[test]
    fn adopts_configured_identity_ignoring_case() {
        let resolver = TlsIdentityResolver::new("Example.com");
        let configured = Arc::new(TlsHostConfig::blank("example.com"));
        resolver.add_host(Arc::clone(&configured)).unwrap();

        assert!(Arc::ptr_eq(resolver.default_identity(), &configured));
        let names: Vec<String> = resolver.hosts().iter().map(|h| h.host_name()).collect();
        assert_eq!(names, vec!["example.com".to_string()]);
    }

    #[test]
    fn fabricates_and_registers_identity() {
        let resolver = TlsIdentityResolver::default();
        resolver
            .add_host(Arc::new(TlsHostConfig::blank("other.example")))
            .unwrap();

        let identity = Arc::clone(resolver.default_identity());
        assert_eq!(identity.host_name(), DEFAULT_HOST_NAME);
        let hosts = resolver.hosts();
        assert_eq!(hosts.len(), 2);
        assert!(Arc::ptr_eq(&hosts[1], &identity));
    }

    #[test]
    fn resolution_happens_once() {
        let resolver = TlsIdentityResolver::default();
        let first = Arc::clone(resolver.default_identity());
        let second = Arc::clone(resolver.default_identity());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.hosts().len(), 1);
    }

    #[test]
    fn rename_after_resolution_propagates() {
        let resolver = TlsIdentityResolver::default();
        let identity = Arc::clone(resolver.default_identity());
        resolver.set_default_host_name("secure.example");
        assert_eq!(identity.host_name(), "secure.example");
        assert_eq!(resolver.default_host_name(), "secure.example");
    }

    #[test]
    fn rename_before_resolution_picks_new_name() {
        let resolver = TlsIdentityResolver::default();
        let configured = Arc::new(TlsHostConfig::blank("b.example"));
        resolver.add_host(Arc::clone(&configured)).unwrap();
        resolver.set_default_host_name("b.example");
        assert!(Arc::ptr_eq(resolver.default_identity(), &configured));
    }

    #[test]
    fn duplicate_hosts_rejected() {
        let resolver = TlsIdentityResolver::default();
        resolver
            .add_host(Arc::new(TlsHostConfig::blank("A.example")))
            .unwrap();
        let err = resolver
            .add_host(Arc::new(TlsHostConfig::blank("a.example")))
            .unwrap_err();
        assert!(matches!(err, TlsError::DuplicateHost(_)));
    }

    #[test]
    fn sni_lookup_order() {
        let resolver = TlsIdentityResolver::default();
        let exact = Arc::new(TlsHostConfig::blank("api.example.com"));
        let wildcard = Arc::new(TlsHostConfig::blank("*.example.com"));
        resolver.add_host(Arc::clone(&exact)).unwrap();
        resolver.add_host(Arc::clone(&wildcard)).unwrap();

        assert!(Arc::ptr_eq(&resolver.lookup(Some("API.example.com")), &exact));
        assert!(Arc::ptr_eq(&resolver.lookup(Some("www.example.com")), &wildcard));
        let fallback = resolver.lookup(Some("example.net"));
        assert!(Arc::ptr_eq(&fallback, resolver.default_identity()));
        assert!(Arc::ptr_eq(&resolver.lookup(None), resolver.default_identity()));
    }
}
