//! HTTP/1.1 protocol handler for one endpoint.
//!
//! # Data Flow
//! ```text
//! Configuration:
//!     ServerConfig → Http11Protocol::from_config
//!     add_upgrade_protocol → init (derive ALPN/Upgrade maps, diagnostics)
//!
//! Per connection:
//!     SocketWrapper (negotiated ALPN name?)
//!     → create_processor
//!         ALPN hit  → UpgradeProtocol::create_token → upgrade adapter
//!         otherwise → Http11Processor stamped with limits/settings/compression
//!     Upgrade request → upgrade_protocol_for → create_upgrade_processor
//!
//! Reload:
//!     ConfigWatcher → apply_config (limits, http, compression, trailers)
//! ```
//!
//! # Design Decisions
//! - Limits, settings and compression sit behind `ArcSwap`; every processor
//!   takes a snapshot when it is built
//! - The trailer allow-list is shared live with processors
//! - Upgrade protocols and TLS identities are fixed once traffic starts

pub mod compression;
pub mod limits;
pub mod processor;
pub mod settings;
pub mod trailers;

use std::sync::Arc;

use arc_swap::ArcSwap;
use http::header::{CONNECTION, UPGRADE};
use http::request::Parts;
use regex::Regex;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::net::tls::{build_server_config, TlsError, TlsHostConfig, TlsHostSettings};
use crate::net::{Endpoint, SocketWrapper, TlsIdentityResolver};
use crate::upgrade::{
    ConfigDiagnostic, NegotiationResolver, ProtocolRegistry, UpgradeProtocol, UpgradeToken,
};

pub use compression::{CompressionConfig, CompressionError, CompressionSettings, PatternError};
pub use limits::OperationalLimits;
pub use processor::{
    Adapter, DefaultProcessorConfig, Http11Processor, Processor, ProcessorError,
    ProcessorFactory, ServiceOutcome,
};
pub use settings::Http11Settings;
pub use trailers::TrailerHeaderPolicy;

/// Failure to apply a configuration to the handler.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Compression(#[from] CompressionError),
}

/// Generates a get/set pair for one field of [`OperationalLimits`].
macro_rules! limit_property {
    ($(#[$meta:meta])* $field:ident, $setter:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $field(&self) -> $ty {
            self.limits.load().limits.$field
        }

        pub fn $setter(&self, value: $ty) {
            self.update_limits(|limits| limits.$field = value);
        }
    };
}

/// Limits together with the compiled form of their user-agent pattern, so
/// the two are always swapped as one.
#[derive(Debug, Default)]
struct LimitsState {
    limits: Arc<OperationalLimits>,
    restricted_user_agents: Option<Regex>,
}

/// Per-endpoint HTTP/1.1 protocol handler.
pub struct Http11Protocol {
    endpoint: Arc<dyn Endpoint>,
    adapter: Arc<dyn Adapter>,
    registry: ProtocolRegistry,
    limits: ArcSwap<LimitsState>,
    settings: ArcSwap<Http11Settings>,
    compression: ArcSwap<CompressionConfig>,
    trailers: Arc<TrailerHeaderPolicy>,
    tls: TlsIdentityResolver,
    initialized: bool,
}

impl Http11Protocol {
    /// Handler with default limits and no alternate protocols.
    pub fn new(endpoint: Arc<dyn Endpoint>, adapter: Arc<dyn Adapter>) -> Self {
        Self {
            endpoint,
            adapter,
            registry: ProtocolRegistry::new(),
            limits: ArcSwap::from_pointee(LimitsState::default()),
            settings: ArcSwap::from_pointee(Http11Settings::default()),
            compression: ArcSwap::from_pointee(CompressionConfig::default()),
            trailers: Arc::new(TrailerHeaderPolicy::new()),
            tls: TlsIdentityResolver::default(),
            initialized: false,
        }
    }

    /// Build a handler from a validated configuration.
    pub fn from_config(
        config: &ServerConfig,
        endpoint: Arc<dyn Endpoint>,
        adapter: Arc<dyn Adapter>,
    ) -> Result<Self, ProtocolError> {
        let protocol = Self::new(endpoint, adapter);
        protocol
            .tls
            .set_default_host_name(config.tls.default_host_name.clone());
        for host in &config.tls.hosts {
            protocol.add_tls_host(host.clone())?;
        }
        protocol.apply_config(config)?;
        Ok(protocol)
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }

    // ---- Alternate protocols ----

    /// Register an alternate protocol. Takes effect at [`init`](Self::init).
    pub fn add_upgrade_protocol(&mut self, protocol: Arc<dyn UpgradeProtocol>) {
        if self.initialized {
            tracing::warn!(
                endpoint = %self.name(),
                protocol = %protocol.name(),
                "Upgrade protocol added after init; it becomes reachable on the next init"
            );
        }
        self.registry.register(protocol);
    }

    pub fn upgrade_protocols(&self) -> &[Arc<dyn UpgradeProtocol>] {
        self.registry.protocols()
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Derive the negotiation maps and advertise ALPN names on the endpoint.
    pub fn init(&mut self) -> Vec<ConfigDiagnostic> {
        let diagnostics = self.registry.configure_at_startup(self.endpoint.as_ref());
        self.initialized = true;
        tracing::info!(
            endpoint = %self.name(),
            protocols = self.registry.protocols().len(),
            unreachable = diagnostics.len(),
            "HTTP/1.1 protocol handler initialized"
        );
        diagnostics
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Protocol requested by an `Upgrade` request, if one is registered and
    /// accepts it. Tokens are tried in the order the client listed them.
    pub fn upgrade_protocol_for(&self, request: &Parts) -> Option<Arc<dyn UpgradeProtocol>> {
        let wants_upgrade = request
            .headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case("upgrade"));
        if !wants_upgrade {
            return None;
        }

        request
            .headers
            .get_all(UPGRADE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .filter_map(|token| self.resolve_by_upgrade_token(token))
            .find(|protocol| protocol.accept(request))
    }

    // ---- Processors ----

    /// Snapshot of everything stamped into a default processor.
    pub fn processor_config(&self) -> DefaultProcessorConfig {
        let limits = self.limits.load();
        DefaultProcessorConfig {
            limits: Arc::clone(&limits.limits),
            restricted_user_agents: limits.restricted_user_agents.clone(),
            settings: self.settings.load_full(),
            compression: self.compression.load_full(),
            trailers: Arc::clone(&self.trailers),
        }
    }

    /// Processor for a freshly accepted connection. A connection whose TLS
    /// handshake selected a registered ALPN protocol gets that protocol's
    /// adapter; everything else gets the default HTTP/1.1 processor.
    pub fn create_processor(&self, socket: Arc<SocketWrapper>) -> Result<Processor, ProcessorError> {
        let negotiated = socket
            .negotiated_protocol()
            .filter(|name| *name != "http/1.1")
            .and_then(|name| self.resolve_by_alpn_name(name));

        match negotiated {
            Some(protocol) => {
                ProcessorFactory::create_upgrade_processor(socket, protocol.create_token())
            }
            None => self.create_default_processor(socket),
        }
    }

    pub fn create_default_processor(
        &self,
        socket: Arc<SocketWrapper>,
    ) -> Result<Processor, ProcessorError> {
        ProcessorFactory::create_default_processor(
            socket,
            Arc::clone(&self.adapter),
            self.processor_config(),
        )
    }

    pub fn create_upgrade_processor(
        &self,
        socket: Arc<SocketWrapper>,
        token: UpgradeToken,
    ) -> Result<Processor, ProcessorError> {
        ProcessorFactory::create_upgrade_processor(socket, token)
    }

    // ---- Operational limits ----

    pub fn limits(&self) -> Arc<OperationalLimits> {
        Arc::clone(&self.limits.load().limits)
    }

    fn update_limits(&self, f: impl Fn(&mut OperationalLimits)) {
        self.limits.rcu(|current| {
            let mut next = OperationalLimits::clone(&current.limits);
            f(&mut next);
            LimitsState {
                limits: Arc::new(next),
                restricted_user_agents: current.restricted_user_agents.clone(),
            }
        });
    }

    limit_property!(
        /// Base read timeout for the connection, in milliseconds.
        connection_timeout_ms, set_connection_timeout_ms, i64
    );
    limit_property!(connection_upload_timeout_ms, set_connection_upload_timeout_ms, i64);
    limit_property!(disable_upload_timeout, set_disable_upload_timeout, bool);
    limit_property!(max_http_header_size, set_max_http_header_size, i32);
    limit_property!(max_trailer_size, set_max_trailer_size, i32);
    limit_property!(max_extension_size, set_max_extension_size, i32);
    limit_property!(max_swallow_size, set_max_swallow_size, i32);
    limit_property!(max_save_post_size, set_max_save_post_size, i32);
    limit_property!(
        /// `1` disables keep-alive, zero or negative is unlimited.
        max_keep_alive_requests, set_max_keep_alive_requests, i32
    );

    pub fn restricted_user_agents(&self) -> Option<String> {
        self.limits.load().limits.restricted_user_agents.clone()
    }

    /// Set the user-agent pattern that forces HTTP/1.0. `None` or an empty
    /// pattern clears it.
    pub fn set_restricted_user_agents(&self, pattern: Option<&str>) -> Result<(), PatternError> {
        let compiled = compression::compile_pattern("restrictedUserAgents", pattern)?;
        let raw = compiled.as_ref().map(|r| r.as_str().to_string());
        self.limits.rcu(|current| {
            let mut next = OperationalLimits::clone(&current.limits);
            next.restricted_user_agents = raw.clone();
            LimitsState {
                limits: Arc::new(next),
                restricted_user_agents: compiled.clone(),
            }
        });
        Ok(())
    }

    // ---- HTTP settings and compression ----

    pub fn settings(&self) -> Arc<Http11Settings> {
        self.settings.load_full()
    }

    pub fn update_settings(&self, f: impl Fn(&mut Http11Settings)) {
        self.settings.rcu(|current| {
            let mut next = Http11Settings::clone(current);
            f(&mut next);
            next
        });
    }

    pub fn compression(&self) -> Arc<CompressionConfig> {
        self.compression.load_full()
    }

    /// `off`, `on`, `force` or a minimum size.
    pub fn set_compression(&self, value: &str) -> Result<(), CompressionError> {
        let mut next = CompressionConfig::clone(&self.compression.load());
        next.set_compression(value)?;
        self.compression.store(Arc::new(next));
        Ok(())
    }

    // ---- Trailer allow-list ----

    pub fn trailer_policy(&self) -> &Arc<TrailerHeaderPolicy> {
        &self.trailers
    }

    pub fn allowed_trailer_headers(&self) -> String {
        self.trailers.to_list_string()
    }

    pub fn set_allowed_trailer_headers(&self, list: &str) {
        self.trailers.bulk_replace(list);
    }

    pub fn add_allowed_trailer_header(&self, name: &str) {
        self.trailers.add(name);
    }

    pub fn remove_allowed_trailer_header(&self, name: &str) {
        self.trailers.remove(name);
    }

    // ---- TLS identities ----

    pub fn tls_identities(&self) -> &TlsIdentityResolver {
        &self.tls
    }

    pub fn add_tls_host(&self, settings: TlsHostSettings) -> Result<Arc<TlsHostConfig>, TlsError> {
        let identity = Arc::new(TlsHostConfig::new(settings));
        self.tls.add_host(Arc::clone(&identity))?;
        Ok(identity)
    }

    pub fn default_host_name(&self) -> String {
        self.tls.default_host_name()
    }

    pub fn set_default_host_name(&self, host_name: impl Into<String>) {
        self.tls.set_default_host_name(host_name);
    }

    /// Identity behind the endpoint-level TLS properties (certificate,
    /// protocols, ciphers, verification, sessions). Resolved on first call.
    pub fn default_tls_identity(&self) -> &Arc<TlsHostConfig> {
        self.tls.default_identity()
    }

    /// rustls configuration for the identity serving `sni_host`.
    pub fn tls_server_config(
        &self,
        sni_host: Option<&str>,
    ) -> Result<Arc<rustls::ServerConfig>, TlsError> {
        let identity = self.tls.lookup(sni_host);
        let config = build_server_config(&identity, self.endpoint.alpn_protocols())?;
        Ok(Arc::new(config))
    }

    // ---- Reload ----

    /// Apply the reloadable part of `config`. Nothing changes if any part
    /// fails to compile.
    pub fn apply_config(&self, config: &ServerConfig) -> Result<(), ProtocolError> {
        let restricted = compression::compile_pattern(
            "restrictedUserAgents",
            config.limits.restricted_user_agents.as_deref(),
        )?;
        let compression = CompressionConfig::from_settings(&config.compression)?;

        self.limits.store(Arc::new(LimitsState {
            limits: Arc::new(config.limits.clone()),
            restricted_user_agents: restricted,
        }));
        self.settings.store(Arc::new(config.http.clone()));
        self.compression.store(Arc::new(compression));
        self.trailers.bulk_replace(&config.http.allowed_trailer_headers);

        tracing::info!(
            endpoint = %self.name(),
            keep_alive = config.limits.max_keep_alive_requests,
            timeout_ms = config.limits.connection_timeout_ms,
            trailers = %self.trailers.to_list_string(),
            "Connector configuration applied"
        );
        Ok(())
    }
}

impl NegotiationResolver for Http11Protocol {
    fn resolve_by_alpn_name(&self, name: &str) -> Option<Arc<dyn UpgradeProtocol>> {
        self.registry.resolve_by_alpn_name(name)
    }

    fn resolve_by_upgrade_token(&self, token: &str) -> Option<Arc<dyn UpgradeProtocol>> {
        self.registry.resolve_by_upgrade_token(token)
    }
}

impl std::fmt::Debug for Http11Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http11Protocol")
            .field("endpoint", &self.endpoint.name())
            .field("registry", &self.registry)
            .field("limits", &self.limits.load().limits)
            .field("trailers", &self.trailers.snapshot())
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}
