//! Response compression decision.
//!
//! Only decides whether a response should be gzip-encoded and rewrites the
//! response headers accordingly. The codec lives with the output filters.

use std::fmt;
use std::str::FromStr;

use http::header::{
    ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT, VARY,
};
use http::{HeaderMap, HeaderValue};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_COMPRESSION_MIN_SIZE: i32 = 2048;

pub const DEFAULT_COMPRESSIBLE_MIME_TYPES: &str = "text/html,text/xml,text/plain,text/css,\
text/javascript,application/javascript,application/json,application/xml";

/// A user-agent pattern that failed to compile.
#[derive(Debug, Error)]
#[error("invalid {field} pattern '{pattern}': {source}")]
pub struct PatternError {
    pub field: &'static str,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Compile an optional user-agent pattern. Empty means none.
pub fn compile_pattern(
    field: &'static str,
    pattern: Option<&str>,
) -> Result<Option<Regex>, PatternError> {
    match pattern.map(str::trim).filter(|p| !p.is_empty()) {
        None => Ok(None),
        Some(p) => Regex::new(p).map(Some).map_err(|source| PatternError {
            field,
            pattern: p.to_string(),
            source,
        }),
    }
}

#[derive(Debug, Error)]
#[error("invalid compression mode '{0}': expected off, on, force or a minimum size")]
pub struct CompressionModeError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    Off,
    On,
    /// Compress even when size, MIME type or user agent say otherwise.
    Force,
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionMode::Off => write!(f, "off"),
            CompressionMode::On => write!(f, "on"),
            CompressionMode::Force => write!(f, "force"),
        }
    }
}

/// Parsed `compression` attribute: a mode plus an optional minimum size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSetting {
    pub mode: CompressionMode,
    pub min_size: Option<i32>,
}

impl FromStr for CompressionSetting {
    type Err = CompressionModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s.trim().to_ascii_lowercase().as_str() {
            "on" => CompressionMode::On,
            "off" => CompressionMode::Off,
            "force" => CompressionMode::Force,
            other => {
                let min_size = other
                    .parse::<i32>()
                    .map_err(|_| CompressionModeError(s.to_string()))?;
                return Ok(Self {
                    mode: CompressionMode::On,
                    min_size: Some(min_size),
                });
            }
        };
        Ok(Self {
            mode,
            min_size: None,
        })
    }
}

/// Configuration form of the compression knobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionSettings {
    /// `off`, `on`, `force`, or a minimum size in bytes (implies `on`).
    pub compression: String,
    pub compression_min_size: i32,
    pub compressible_mime_types: String,
    pub no_compression_user_agents: Option<String>,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            compression: "off".into(),
            compression_min_size: DEFAULT_COMPRESSION_MIN_SIZE,
            compressible_mime_types: DEFAULT_COMPRESSIBLE_MIME_TYPES.into(),
            no_compression_user_agents: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error(transparent)]
    Mode(#[from] CompressionModeError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// Compiled compression policy stamped into each default processor.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    mode: CompressionMode,
    min_size: i32,
    mime_types: Vec<String>,
    no_compression_user_agents: Option<Regex>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            mode: CompressionMode::Off,
            min_size: DEFAULT_COMPRESSION_MIN_SIZE,
            mime_types: parse_mime_types(DEFAULT_COMPRESSIBLE_MIME_TYPES),
            no_compression_user_agents: None,
        }
    }
}

fn parse_mime_types(list: &str) -> Vec<String> {
    list.split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

impl CompressionConfig {
    pub fn from_settings(settings: &CompressionSettings) -> Result<Self, CompressionError> {
        let mut config = Self {
            min_size: settings.compression_min_size,
            mime_types: parse_mime_types(&settings.compressible_mime_types),
            ..Self::default()
        };
        config.set_compression(&settings.compression)?;
        config.set_no_compression_user_agents(settings.no_compression_user_agents.as_deref())?;
        Ok(config)
    }

    pub fn mode(&self) -> CompressionMode {
        self.mode
    }

    /// Attribute form: `off`, `on` or `force`.
    pub fn compression(&self) -> String {
        self.mode.to_string()
    }

    /// A numeric value switches compression on with that minimum size.
    pub fn set_compression(&mut self, value: &str) -> Result<(), CompressionModeError> {
        let setting: CompressionSetting = value.parse()?;
        self.mode = setting.mode;
        if let Some(min_size) = setting.min_size {
            self.min_size = min_size;
        }
        Ok(())
    }

    pub fn min_size(&self) -> i32 {
        self.min_size
    }

    pub fn set_min_size(&mut self, min_size: i32) {
        self.min_size = min_size;
    }

    pub fn compressible_mime_types(&self) -> String {
        self.mime_types.join(",")
    }

    pub fn set_compressible_mime_types(&mut self, list: &str) {
        self.mime_types = parse_mime_types(list);
    }

    pub fn no_compression_user_agents(&self) -> Option<&str> {
        self.no_compression_user_agents.as_ref().map(Regex::as_str)
    }

    pub fn set_no_compression_user_agents(
        &mut self,
        pattern: Option<&str>,
    ) -> Result<(), PatternError> {
        self.no_compression_user_agents = compile_pattern("noCompressionUserAgents", pattern)?;
        Ok(())
    }

    /// Decide whether the response is compressed and rewrite its headers.
    ///
    /// `Vary: accept-encoding` is added as soon as the response itself is
    /// eligible, whatever the client turns out to accept.
    pub fn use_compression(&self, request: &HeaderMap, response: &mut HeaderMap) -> bool {
        if self.mode == CompressionMode::Off {
            return false;
        }

        if let Some(encoding) = response.get(CONTENT_ENCODING) {
            if !encoding.as_bytes().eq_ignore_ascii_case(b"identity") {
                return false;
            }
        }

        if self.mode != CompressionMode::Force {
            let length = response
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok());
            if let Some(length) = length {
                if length < i64::from(self.min_size) {
                    return false;
                }
            }
            if !self.is_compressible(response.get(CONTENT_TYPE)) {
                return false;
            }
        }

        add_vary_accept_encoding(response);

        if !accepts_gzip(request) {
            return false;
        }

        if self.mode != CompressionMode::Force {
            if let Some(pattern) = &self.no_compression_user_agents {
                let agent = request
                    .get(USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if pattern.is_match(agent) {
                    return false;
                }
            }
        }

        response.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        response.remove(CONTENT_LENGTH);
        true
    }

    fn is_compressible(&self, content_type: Option<&HeaderValue>) -> bool {
        let Some(content_type) = content_type.and_then(|v| v.to_str().ok()) else {
            return false;
        };
        let content_type = content_type.to_ascii_lowercase();
        self.mime_types
            .iter()
            .any(|mime| content_type.starts_with(mime.as_str()))
    }
}

fn add_vary_accept_encoding(response: &mut HeaderMap) {
    let existing = response
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>();

    if existing.iter().any(|v| v == "*" || v == "accept-encoding") {
        return;
    }
    response.append(VARY, HeaderValue::from_static("accept-encoding"));
}

fn accepts_gzip(request: &HeaderMap) -> bool {
    request
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|coding| {
            let mut parts = coding.split(';');
            let name = parts.next().unwrap_or_default().trim();
            let rejected = parts.any(|p| {
                let p = p.trim();
                p.strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q == 0.0)
            });
            name.eq_ignore_ascii_case("gzip") && !rejected
        })
}
