//! HTTP/1.1 behaviour switches that are not size or time limits.
//!
//! The processor enforces the relaxed characters, the Host check, the
//! `Server` header and the secure flag. `reject_illegal_header_name` and
//! `use_sendfile` are carried for the byte-level parser and the static file
//! path of the connector run loop, which sit outside this crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Http11Settings {
    /// Comma-separated header names allowed in chunked trailers.
    pub allowed_trailer_headers: String,

    /// Send `Connection: keep-alive` on kept-alive HTTP/1.0 responses.
    pub use_keep_alive_response_header: bool,

    /// Extra characters tolerated unencoded in the request path.
    pub relaxed_path_chars: Option<String>,
    /// Extra characters tolerated unencoded in the query string.
    pub relaxed_query_chars: Option<String>,

    pub allow_host_header_mismatch: bool,
    pub reject_illegal_header_name: bool,

    /// Value for the `Server` response header.
    pub server: Option<String>,
    /// Replace a `Server` header set by the application with `server`.
    pub server_remove_app_provided_values: bool,

    pub use_sendfile: bool,

    /// Mark requests as secure even on cleartext (TLS offloaded upstream).
    pub secure: bool,
}

impl Default for Http11Settings {
    fn default() -> Self {
        Self {
            allowed_trailer_headers: String::new(),
            use_keep_alive_response_header: true,
            relaxed_path_chars: None,
            relaxed_query_chars: None,
            allow_host_header_mismatch: true,
            reject_illegal_header_name: false,
            server: None,
            server_remove_app_provided_values: false,
            use_sendfile: true,
            secure: false,
        }
    }
}

impl Http11Settings {
    pub fn is_relaxed_path_char(&self, c: char) -> bool {
        self.relaxed_path_chars
            .as_deref()
            .is_some_and(|chars| chars.contains(c))
    }

    pub fn is_relaxed_query_char(&self, c: char) -> bool {
        self.relaxed_query_chars
            .as_deref()
            .is_some_and(|chars| chars.contains(c))
    }

    /// The `Server` header to send, given what the application set.
    pub fn server_header(&self, app_value: Option<&str>) -> Option<String> {
        match (&self.server, app_value) {
            (Some(configured), Some(_)) if self.server_remove_app_provided_values => {
                Some(configured.clone())
            }
            (_, Some(app)) => Some(app.to_string()),
            (Some(configured), None) => Some(configured.clone()),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_header_policy() {
        let mut settings = Http11Settings::default();
        assert_eq!(settings.server_header(None), None);
        assert_eq!(settings.server_header(Some("app")), Some("app".into()));

        settings.server = Some("edge".into());
        assert_eq!(settings.server_header(None), Some("edge".into()));
        assert_eq!(settings.server_header(Some("app")), Some("app".into()));

        settings.server_remove_app_provided_values = true;
        assert_eq!(settings.server_header(Some("app")), Some("edge".into()));
    }

    #[test]
    fn relaxed_chars() {
        let settings = Http11Settings {
            relaxed_path_chars: Some("[]|".into()),
            ..Http11Settings::default()
        };
        assert!(settings.is_relaxed_path_char('|'));
        assert!(!settings.is_relaxed_path_char('{'));
        assert!(!settings.is_relaxed_query_char('|'));
    }
}
