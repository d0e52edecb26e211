//! Processor construction.
//!
//! # Responsibilities
//! - Build the default HTTP/1.1 processor stamped with the endpoint's limits
//! - Wrap upgrade handlers in the adapter matching their declared kind
//! - Enact the connection timeout policy on the socket
//!
//! # Design Decisions
//! - Processors receive `Arc` snapshots of the configuration; a later
//!   reconfiguration affects new connections only, except for the trailer
//!   allow-list which is shared live
//! - Adapter selection depends on the handler kind alone
//! - A closed socket is the only construction failure

use std::sync::Arc;

use http::header::{CONNECTION, HOST, SERVER, USER_AGENT};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, Version};
use regex::Regex;
use thiserror::Error;

use crate::net::{ConnectionId, SocketWrapper};
use crate::observability::metrics;
use crate::protocol::compression::CompressionConfig;
use crate::protocol::limits::OperationalLimits;
use crate::protocol::settings::Http11Settings;
use crate::protocol::trailers::TrailerHeaderPolicy;
use crate::upgrade::handler::{HandlerKind, UpgradeHandler, UpgradeToken};
use crate::upgrade::processor::{UpgradeProcessorExternal, UpgradeProcessorInternal};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("connection {0} closed before a processor could be attached")]
    SocketClosed(ConnectionId),
}

/// Application entry point a default processor hands parsed requests to.
pub trait Adapter: Send + Sync {
    fn service(&self, request: &Request<()>) -> Response<()>;
}

impl<F> Adapter for F
where
    F: Fn(&Request<()>) -> Response<()> + Send + Sync,
{
    fn service(&self, request: &Request<()>) -> Response<()> {
        self(request)
    }
}

/// Configuration stamped into every default processor.
#[derive(Debug, Clone)]
pub struct DefaultProcessorConfig {
    pub limits: Arc<OperationalLimits>,
    /// Compiled form of `limits.restricted_user_agents`.
    pub restricted_user_agents: Option<Regex>,
    pub settings: Arc<Http11Settings>,
    pub compression: Arc<CompressionConfig>,
    pub trailers: Arc<TrailerHeaderPolicy>,
}

impl Default for DefaultProcessorConfig {
    fn default() -> Self {
        Self {
            limits: Arc::new(OperationalLimits::default()),
            restricted_user_agents: None,
            settings: Arc::new(Http11Settings::default()),
            compression: Arc::new(CompressionConfig::default()),
            trailers: Arc::new(TrailerHeaderPolicy::new()),
        }
    }
}

/// A processor bound to one connection.
#[derive(Debug)]
pub enum Processor {
    Http11(Http11Processor),
    UpgradeInternal(UpgradeProcessorInternal),
    UpgradeExternal(UpgradeProcessorExternal),
}

impl Processor {
    pub fn kind(&self) -> &'static str {
        match self {
            Processor::Http11(_) => "http11",
            Processor::UpgradeInternal(_) => "upgrade_internal",
            Processor::UpgradeExternal(_) => "upgrade_external",
        }
    }

    pub fn socket(&self) -> &Arc<SocketWrapper> {
        match self {
            Processor::Http11(p) => p.socket(),
            Processor::UpgradeInternal(p) => p.socket(),
            Processor::UpgradeExternal(p) => p.socket(),
        }
    }

    pub fn is_upgrade(&self) -> bool {
        !matches!(self, Processor::Http11(_))
    }
}

/// Outcome of servicing one request on a default processor.
#[derive(Debug)]
pub struct ServiceOutcome {
    pub response: Response<()>,
    pub keep_alive: bool,
}

/// Characters rejected in the request target unless relaxed by settings.
const RELAXABLE_CHARS: &str = "\"<>[\\]^`{|}";

/// Default HTTP/1.1 processor.
pub struct Http11Processor {
    socket: Arc<SocketWrapper>,
    adapter: Arc<dyn Adapter>,
    config: DefaultProcessorConfig,
    keep_alive_left: i32,
    reading_body: bool,
}

impl Http11Processor {
    fn new(
        socket: Arc<SocketWrapper>,
        adapter: Arc<dyn Adapter>,
        config: DefaultProcessorConfig,
    ) -> Self {
        let keep_alive_left = config.limits.max_keep_alive_requests;
        socket.set_read_timeout(config.limits.connection_timeout_ms);
        Self {
            socket,
            adapter,
            config,
            keep_alive_left,
            reading_body: false,
        }
    }

    pub fn socket(&self) -> &Arc<SocketWrapper> {
        &self.socket
    }

    pub fn limits(&self) -> &OperationalLimits {
        &self.config.limits
    }

    pub fn settings(&self) -> &Http11Settings {
        &self.config.settings
    }

    /// Requests count as secure on TLS sockets, or when TLS is offloaded
    /// upstream and the settings say so.
    pub fn is_secure(&self) -> bool {
        self.socket.is_secure() || self.config.settings.secure
    }

    pub fn keep_alive_left(&self) -> i32 {
        self.keep_alive_left
    }

    /// Timeout currently enacted on the socket.
    pub fn effective_read_timeout(&self) -> i64 {
        self.socket.read_timeout()
    }

    /// Reset the socket to the connection timeout ahead of a request line.
    pub fn start_request(&mut self) {
        self.reading_body = false;
        self.socket
            .set_read_timeout(self.config.limits.connection_timeout_ms);
    }

    /// Switch to the upload timeout for the body, unless that is disabled.
    pub fn begin_body_read(&mut self) {
        self.reading_body = true;
        let limits = &self.config.limits;
        if limits.disable_upload_timeout {
            return;
        }
        self.socket.set_read_timeout(limits.connection_upload_timeout_ms);
        tracing::trace!(
            connection_id = %self.socket.id(),
            timeout_ms = limits.connection_upload_timeout_ms,
            "Upload timeout applied"
        );
    }

    /// Revert to the connection timeout once the body is consumed.
    pub fn end_body_read(&mut self) {
        if !self.reading_body {
            return;
        }
        self.reading_body = false;
        let limits = &self.config.limits;
        if limits.disable_upload_timeout {
            return;
        }
        self.socket.set_read_timeout(limits.connection_timeout_ms);
        tracing::trace!(
            connection_id = %self.socket.id(),
            timeout_ms = limits.connection_timeout_ms,
            "Connection timeout restored"
        );
    }

    /// Run one parsed request through the adapter and finish the response
    /// headers.
    pub fn service(&mut self, request: &Request<()>) -> ServiceOutcome {
        self.start_request();

        if let Err(reason) = self.check_request(request) {
            tracing::debug!(
                connection_id = %self.socket.id(),
                reason,
                "Rejecting request"
            );
            return bad_request();
        }

        let mut keep_alive = true;
        let mut http10 = false;

        if self.is_restricted_agent(request.headers()) {
            tracing::debug!(
                connection_id = %self.socket.id(),
                "Restricted user agent, downgrading to HTTP/1.0"
            );
            http10 = true;
            keep_alive = false;
        }

        if request.version() <= Version::HTTP_10 {
            http10 = true;
            keep_alive = keep_alive && connection_has(request.headers(), "keep-alive");
        } else if connection_has(request.headers(), "close") {
            keep_alive = false;
        }

        let cap = self.config.limits.max_keep_alive_requests;
        if cap == 1 {
            keep_alive = false;
        } else if cap > 0 {
            self.keep_alive_left -= 1;
            if self.keep_alive_left <= 0 {
                keep_alive = false;
            }
        }

        let mut response = self.adapter.service(request);
        if http10 {
            *response.version_mut() = Version::HTTP_10;
        }
        if connection_has(response.headers(), "close") {
            keep_alive = false;
        }

        self.apply_server_header(response.headers_mut());
        self.config
            .compression
            .use_compression(request.headers(), response.headers_mut());

        if !keep_alive {
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("close"));
        } else if http10 && self.config.settings.use_keep_alive_response_header {
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        ServiceOutcome {
            response,
            keep_alive,
        }
    }

    /// Drop trailer fields that are not on the allow-list.
    pub fn filter_trailers(&self, trailers: HeaderMap) -> HeaderMap {
        let mut accepted = HeaderMap::with_capacity(trailers.len());
        let mut rejected = 0usize;
        let mut current = None;
        for (name, value) in trailers {
            if let Some(name) = name {
                current = Some(name);
            }
            let Some(name) = current.clone() else {
                continue;
            };
            if self.config.trailers.contains(name.as_str()) {
                accepted.append(name, value);
            } else {
                rejected += 1;
                tracing::debug!(
                    connection_id = %self.socket.id(),
                    trailer = %name,
                    "Trailer header not allowed"
                );
            }
        }
        if rejected > 0 {
            metrics::record_trailers_rejected(rejected);
        }
        accepted
    }

    /// Whether a body of `len` bytes may be buffered for replay.
    pub fn can_save_post(&self, len: i64) -> bool {
        let max = self.config.limits.max_save_post_size;
        max < 0 || len <= i64::from(max)
    }

    /// Request-target characters and Host header consistency.
    fn check_request(&self, request: &Request<()>) -> Result<(), &'static str> {
        let settings = &self.config.settings;
        let uri = request.uri();
        if has_illegal_char(uri.path(), |c| settings.is_relaxed_path_char(c)) {
            return Err("illegal character in request path");
        }
        if uri
            .query()
            .is_some_and(|query| has_illegal_char(query, |c| settings.is_relaxed_query_char(c)))
        {
            return Err("illegal character in query string");
        }

        if settings.allow_host_header_mismatch {
            return Ok(());
        }
        let (Some(authority), Some(host)) = (uri.authority(), request.headers().get(HOST)) else {
            return Ok(());
        };
        match host.to_str() {
            Ok(host) if host.eq_ignore_ascii_case(authority.as_str()) => Ok(()),
            _ => Err("Host header does not match the request target"),
        }
    }

    fn is_restricted_agent(&self, headers: &HeaderMap) -> bool {
        let Some(pattern) = &self.config.restricted_user_agents else {
            return false;
        };
        headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|agent| pattern.is_match(agent))
    }

    fn apply_server_header(&self, headers: &mut HeaderMap) {
        let app_value = headers
            .get(SERVER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let Some(value) = self.config.settings.server_header(app_value.as_deref()) else {
            return;
        };
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(SERVER, value);
            }
            Err(_) => {
                tracing::warn!(server = %value, "Configured Server header is not a valid header value");
            }
        }
    }
}

impl std::fmt::Debug for Http11Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http11Processor")
            .field("socket", &self.socket)
            .field("limits", &self.config.limits)
            .field("keep_alive_left", &self.keep_alive_left)
            .field("reading_body", &self.reading_body)
            .finish()
    }
}

fn has_illegal_char(text: &str, is_relaxed: impl Fn(char) -> bool) -> bool {
    text.chars()
        .any(|c| RELAXABLE_CHARS.contains(c) && !is_relaxed(c))
}

/// 400 response that closes the connection.
fn bad_request() -> ServiceOutcome {
    let mut response = Response::new(());
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    ServiceOutcome {
        response,
        keep_alive: false,
    }
}

fn connection_has(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Builds processors for accepted or upgraded connections.
pub struct ProcessorFactory;

impl ProcessorFactory {
    /// Default HTTP/1.1 processor with `config` stamped in.
    pub fn create_default_processor(
        socket: Arc<SocketWrapper>,
        adapter: Arc<dyn Adapter>,
        config: DefaultProcessorConfig,
    ) -> Result<Processor, ProcessorError> {
        if socket.is_closed() {
            return Err(ProcessorError::SocketClosed(socket.id()));
        }
        let processor = Http11Processor::new(socket, adapter, config);
        metrics::record_processor_created("http11");
        tracing::debug!(
            connection_id = %processor.socket().id(),
            kind = "http11",
            "Processor created"
        );
        Ok(Processor::Http11(processor))
    }

    /// Adapter for an upgraded connection, picked by the handler's kind.
    pub fn create_upgrade_processor(
        socket: Arc<SocketWrapper>,
        token: UpgradeToken,
    ) -> Result<Processor, ProcessorError> {
        if socket.is_closed() {
            return Err(ProcessorError::SocketClosed(socket.id()));
        }
        let (protocol, handler) = token.into_parts();
        let kind = handler.kind();
        let connection_id = socket.id();

        let processor = match handler {
            UpgradeHandler::Internal(handler) => {
                Processor::UpgradeInternal(UpgradeProcessorInternal::new(socket, protocol, handler))
            }
            UpgradeHandler::External(handler) => {
                Processor::UpgradeExternal(UpgradeProcessorExternal::new(socket, protocol, handler))
            }
        };

        let label = match kind {
            HandlerKind::Internal => "upgrade_internal",
            HandlerKind::External => "upgrade_external",
        };
        metrics::record_processor_created(label);
        tracing::debug!(connection_id = %connection_id, kind = %kind, "Processor created");
        Ok(processor)
    }
}
