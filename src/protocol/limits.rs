//! Connection-scoped operational limits.
//!
//! Values are stored exactly as configured. Zero or negative numbers are
//! "disabled" sentinels that the processor interprets; nothing here clamps.

use serde::{Deserialize, Serialize};

/// Default idle/read timeout for a connection.
pub const DEFAULT_CONNECTION_TIMEOUT_MS: i64 = 60_000;

/// Numeric and boolean knobs stamped into every default processor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OperationalLimits {
    /// Base read timeout for the whole connection.
    pub connection_timeout_ms: i64,

    /// Read timeout while a request body is consumed, unless disabled.
    pub connection_upload_timeout_ms: i64,

    /// When true the connection timeout applies during body reads as well.
    pub disable_upload_timeout: bool,

    pub max_http_header_size: i32,
    pub max_trailer_size: i32,
    pub max_extension_size: i32,

    /// Bytes of an unread request body swallowed before closing.
    pub max_swallow_size: i32,

    /// Request body bytes kept for replay (e.g. across an auth round trip).
    pub max_save_post_size: i32,

    /// Requests served per kept-alive connection. `1` disables keep-alive,
    /// zero or negative means unlimited.
    pub max_keep_alive_requests: i32,

    /// User-Agent regex that forces an HTTP/1.0 response.
    pub restricted_user_agents: Option<String>,
}

impl Default for OperationalLimits {
    fn default() -> Self {
        Self {
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            connection_upload_timeout_ms: 300_000,
            disable_upload_timeout: true,
            max_http_header_size: 8 * 1024,
            max_trailer_size: 8 * 1024,
            max_extension_size: 8 * 1024,
            max_swallow_size: 2 * 1024 * 1024,
            max_save_post_size: 4 * 1024,
            max_keep_alive_requests: 100,
            restricted_user_agents: None,
        }
    }
}

impl OperationalLimits {
    /// Read timeout in effect while a request body is being read.
    pub fn body_read_timeout_ms(&self) -> i64 {
        if self.disable_upload_timeout {
            self.connection_timeout_ms
        } else {
            self.connection_upload_timeout_ms
        }
    }
}
