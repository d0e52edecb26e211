//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Compile user-agent patterns once so bad regexes fail at load time
//! - Detect duplicate TLS host identities
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Numeric limits are not range checked; zero and negative values are
//!   "disabled" sentinels and pass through unchanged

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::net::tls::parse_protocols;
use crate::protocol::compression::{compile_pattern, CompressionSetting};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("connector name must not be empty")]
    EmptyConnectorName,

    #[error("TLS host '{0}' is configured more than once")]
    DuplicateTlsHost(String),

    #[error("TLS host '{host}' enables unsupported protocol '{protocol}'")]
    UnsupportedTlsProtocol { host: String, protocol: String },

    #[error("{field} is not a valid pattern: {message}")]
    InvalidPattern { field: &'static str, message: String },

    #[error("compression must be off, on, force or a size, got '{0}'")]
    InvalidCompression(String),

    #[error("unknown log level '{0}'")]
    InvalidLogLevel(String),
}

/// Check `config` and report every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.connector.name.trim().is_empty() {
        errors.push(ValidationError::EmptyConnectorName);
    }

    let mut seen = HashSet::new();
    for host in &config.tls.hosts {
        if !seen.insert(host.host_name.to_lowercase()) {
            errors.push(ValidationError::DuplicateTlsHost(host.host_name.clone()));
        }
        for protocol in parse_protocols(&host.protocols.join(",")) {
            if protocol != "TLSv1.2" && protocol != "TLSv1.3" {
                errors.push(ValidationError::UnsupportedTlsProtocol {
                    host: host.host_name.clone(),
                    protocol,
                });
            }
        }
    }

    let patterns = [
        (
            "restricted_user_agents",
            config.limits.restricted_user_agents.as_deref(),
        ),
        (
            "no_compression_user_agents",
            config.compression.no_compression_user_agents.as_deref(),
        ),
    ];
    for (field, pattern) in patterns {
        if let Err(e) = compile_pattern(field, pattern) {
            errors.push(ValidationError::InvalidPattern {
                field,
                message: e.source.to_string(),
            });
        }
    }

    if config
        .compression
        .compression
        .parse::<CompressionSetting>()
        .is_err()
    {
        errors.push(ValidationError::InvalidCompression(
            config.compression.compression.clone(),
        ));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::InvalidLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
