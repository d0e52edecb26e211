//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for one HTTP/1.1
//! connector. All types derive Serde traits for deserialization from config
//! files; every section may be omitted.

use serde::{Deserialize, Serialize};

use crate::net::tls::{TlsHostSettings, DEFAULT_HOST_NAME};
use crate::protocol::compression::CompressionSettings;
use crate::protocol::limits::OperationalLimits;
use crate::protocol::settings::Http11Settings;

/// Root configuration for a connector.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Endpoint identity and transport.
    pub connector: ConnectorConfig,

    /// Timeouts, size caps and keep-alive cap.
    pub limits: OperationalLimits,

    /// HTTP/1.1 behaviour switches and the trailer allow-list.
    pub http: Http11Settings,

    pub compression: CompressionSettings,

    /// TLS identities (used when the connector runs TLS).
    pub tls: TlsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Connector (endpoint) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Name used in logs and diagnostics (e.g. "http-nio-8080").
    pub name: String,

    /// Run TLS on this connector. ALPN is available only with TLS.
    pub ssl_enabled: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            name: "http-8080".to_string(),
            ssl_enabled: false,
        }
    }
}

/// TLS identity set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Host whose identity serves clients without a matching SNI name.
    pub default_host_name: String,

    /// Per-host identities, in order.
    pub hosts: Vec<TlsHostSettings>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            default_host_name: DEFAULT_HOST_NAME.to_string(),
            hosts: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}
