//! TLS host identities and rustls configuration assembly.
//!
//! A [`TlsHostConfig`] is shared by `Arc` between the identity set, the
//! default-identity slot and anyone holding a handle, so edits made through
//! one holder are seen by all of them.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer};
use rustls::server::{ServerSessionMemoryCache, WebPkiClientVerifier};
use rustls::{RootCertStore, ServerConfig, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host name of the identity used when no explicit default is configured.
pub const DEFAULT_HOST_NAME: &str = "_default_";

/// Errors raised while registering identities or assembling rustls configs.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("TLS host {0} is already configured")]
    DuplicateHost(String),

    #[error("no certificate file configured for TLS host {0}")]
    MissingCertificate(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("encrypted private keys are not supported (host {0})")]
    EncryptedKeyUnsupported(String),

    #[error("unsupported TLS protocol version: {0}")]
    UnsupportedProtocol(String),

    #[error("no cipher suite matches {0:?}")]
    NoCipherSuites(String),

    #[error("client certificate verification requires CA material (host {0})")]
    MissingTrustMaterial(String),

    #[error("client verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("rustls: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Client certificate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateVerification {
    #[default]
    None,
    Optional,
    Required,
}

impl std::str::FromStr for CertificateVerification {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "false" | "no" => Ok(Self::None),
            "optional" | "want" => Ok(Self::Optional),
            "required" | "require" | "true" | "yes" => Ok(Self::Required),
            other => Err(format!("unknown certificate verification mode: {other}")),
        }
    }
}

impl std::fmt::Display for CertificateVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Optional => "optional",
            Self::Required => "required",
        };
        f.write_str(name)
    }
}

/// Plain TLS material and policy for one virtual host.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsHostSettings {
    pub host_name: String,

    /// Leaf certificate (PEM). May also hold the key.
    pub certificate_file: Option<PathBuf>,
    pub certificate_key_file: Option<PathBuf>,
    /// Intermediate certificates appended after the leaf.
    pub certificate_chain_file: Option<PathBuf>,
    pub certificate_key_password: Option<String>,

    pub ca_certificate_file: Option<PathBuf>,
    /// Directory of PEM CA certificates.
    pub ca_certificate_path: Option<PathBuf>,
    pub certificate_revocation_list_file: Option<PathBuf>,

    /// Enabled protocol names, e.g. `TLSv1.2`.
    pub protocols: Vec<String>,
    /// IANA cipher suite names separated by `,` or `:`.
    pub ciphers: Option<String>,
    pub honor_cipher_order: bool,

    pub certificate_verification: CertificateVerification,
    pub certificate_verification_depth: i32,

    /// Session cache entries; zero or less keeps the rustls default.
    pub session_cache_size: i32,
    /// Session lifetime in seconds.
    pub session_timeout: i32,
    pub disable_compression: bool,
    pub disable_session_tickets: bool,
}

impl Default for TlsHostSettings {
    fn default() -> Self {
        Self {
            host_name: DEFAULT_HOST_NAME.to_string(),
            certificate_file: None,
            certificate_key_file: None,
            certificate_chain_file: None,
            certificate_key_password: None,
            ca_certificate_file: None,
            ca_certificate_path: None,
            certificate_revocation_list_file: None,
            protocols: vec!["TLSv1.2".to_string(), "TLSv1.3".to_string()],
            ciphers: None,
            honor_cipher_order: false,
            certificate_verification: CertificateVerification::None,
            certificate_verification_depth: 10,
            session_cache_size: 0,
            session_timeout: 86_400,
            disable_compression: true,
            disable_session_tickets: false,
        }
    }
}

/// Shared, mutable TLS identity of one virtual host.
#[derive(Debug, Default)]
pub struct TlsHostConfig {
    settings: RwLock<TlsHostSettings>,
}

impl TlsHostConfig {
    pub fn new(settings: TlsHostSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    /// An identity carrying only a host name.
    pub fn blank(host_name: impl Into<String>) -> Self {
        Self::new(TlsHostSettings {
            host_name: host_name.into(),
            ..TlsHostSettings::default()
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, TlsHostSettings> {
        self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TlsHostSettings> {
        self.settings.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point-in-time copy of every field.
    pub fn settings(&self) -> TlsHostSettings {
        self.read().clone()
    }

    /// Edit several fields under one write lock.
    pub fn update(&self, f: impl FnOnce(&mut TlsHostSettings)) {
        f(&mut self.write());
    }

    pub fn host_name(&self) -> String {
        self.read().host_name.clone()
    }

    pub fn set_host_name(&self, host_name: impl Into<String>) {
        self.write().host_name = host_name.into();
    }

    pub fn certificate_file(&self) -> Option<PathBuf> {
        self.read().certificate_file.clone()
    }

    pub fn set_certificate_file(&self, path: impl Into<PathBuf>) {
        self.write().certificate_file = Some(path.into());
    }

    pub fn certificate_key_file(&self) -> Option<PathBuf> {
        self.read().certificate_key_file.clone()
    }

    pub fn set_certificate_key_file(&self, path: impl Into<PathBuf>) {
        self.write().certificate_key_file = Some(path.into());
    }

    pub fn certificate_chain_file(&self) -> Option<PathBuf> {
        self.read().certificate_chain_file.clone()
    }

    pub fn set_certificate_chain_file(&self, path: impl Into<PathBuf>) {
        self.write().certificate_chain_file = Some(path.into());
    }

    pub fn certificate_key_password(&self) -> Option<String> {
        self.read().certificate_key_password.clone()
    }

    pub fn set_certificate_key_password(&self, password: impl Into<String>) {
        self.write().certificate_key_password = Some(password.into());
    }

    pub fn ca_certificate_file(&self) -> Option<PathBuf> {
        self.read().ca_certificate_file.clone()
    }

    pub fn set_ca_certificate_file(&self, path: impl Into<PathBuf>) {
        self.write().ca_certificate_file = Some(path.into());
    }

    pub fn ca_certificate_path(&self) -> Option<PathBuf> {
        self.read().ca_certificate_path.clone()
    }

    pub fn set_ca_certificate_path(&self, path: impl Into<PathBuf>) {
        self.write().ca_certificate_path = Some(path.into());
    }

    pub fn certificate_revocation_list_file(&self) -> Option<PathBuf> {
        self.read().certificate_revocation_list_file.clone()
    }

    pub fn set_certificate_revocation_list_file(&self, path: impl Into<PathBuf>) {
        self.write().certificate_revocation_list_file = Some(path.into());
    }

    /// Enabled protocols joined with `,`.
    pub fn protocols(&self) -> String {
        self.read().protocols.join(",")
    }

    /// Replace the enabled protocols from a list such as `"all -TLSv1.2"`
    /// or `"+TLSv1.2,+TLSv1.3"`.
    pub fn set_protocols(&self, spec: &str) {
        self.write().protocols = parse_protocols(spec);
    }

    pub fn ciphers(&self) -> Option<String> {
        self.read().ciphers.clone()
    }

    pub fn set_ciphers(&self, ciphers: impl Into<String>) {
        self.write().ciphers = Some(ciphers.into());
    }

    pub fn honor_cipher_order(&self) -> bool {
        self.read().honor_cipher_order
    }

    pub fn set_honor_cipher_order(&self, honor: bool) {
        self.write().honor_cipher_order = honor;
    }

    pub fn certificate_verification(&self) -> CertificateVerification {
        self.read().certificate_verification
    }

    pub fn set_certificate_verification(&self, verification: CertificateVerification) {
        self.write().certificate_verification = verification;
    }

    pub fn certificate_verification_depth(&self) -> i32 {
        self.read().certificate_verification_depth
    }

    pub fn set_certificate_verification_depth(&self, depth: i32) {
        self.write().certificate_verification_depth = depth;
    }

    pub fn session_cache_size(&self) -> i32 {
        self.read().session_cache_size
    }

    pub fn set_session_cache_size(&self, size: i32) {
        self.write().session_cache_size = size;
    }

    pub fn session_timeout(&self) -> i32 {
        self.read().session_timeout
    }

    pub fn set_session_timeout(&self, seconds: i32) {
        self.write().session_timeout = seconds;
    }

    pub fn disable_compression(&self) -> bool {
        self.read().disable_compression
    }

    pub fn set_disable_compression(&self, disable: bool) {
        self.write().disable_compression = disable;
    }

    pub fn disable_session_tickets(&self) -> bool {
        self.read().disable_session_tickets
    }

    pub fn set_disable_session_tickets(&self, disable: bool) {
        self.write().disable_session_tickets = disable;
    }
}

const ALL_PROTOCOLS: [&str; 2] = ["TLSv1.2", "TLSv1.3"];

/// Parse a protocol list. `all` expands to every supported version, a `-`
/// prefix removes, a `+` prefix or bare name adds.
pub fn parse_protocols(spec: &str) -> Vec<String> {
    let mut protocols: Vec<String> = Vec::new();
    for token in spec
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        let (remove, name) = match token.as_bytes()[0] {
            b'-' => (true, &token[1..]),
            b'+' => (false, &token[1..]),
            _ => (false, token),
        };
        if name.is_empty() {
            continue;
        }
        let names: Vec<&str> = if name.eq_ignore_ascii_case("all") {
            ALL_PROTOCOLS.to_vec()
        } else {
            vec![name]
        };
        for name in names {
            if remove {
                protocols.retain(|p| p != name);
            } else if !protocols.iter().any(|p| p == name) {
                protocols.push(name.to_string());
            }
        }
    }
    protocols
}

fn protocol_versions(
    protocols: &[String],
) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
    protocols
        .iter()
        .map(|name| match name.as_str() {
            "TLSv1.2" => Ok(&rustls::version::TLS12),
            "TLSv1.3" => Ok(&rustls::version::TLS13),
            other => Err(TlsError::UnsupportedProtocol(other.to_string())),
        })
        .collect()
}

fn crypto_provider(ciphers: Option<&str>) -> Result<CryptoProvider, TlsError> {
    let mut provider = rustls::crypto::ring::default_provider();
    if let Some(list) = ciphers {
        let wanted: Vec<&str> = list
            .split([',', ':'])
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        provider
            .cipher_suites
            .retain(|suite| wanted.contains(&format!("{:?}", suite.suite()).as_str()));
        if provider.cipher_suites.is_empty() {
            return Err(TlsError::NoCipherSuites(list.to_string()));
        }
    }
    Ok(provider)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

fn load_certified_key(
    settings: &TlsHostSettings,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TlsError> {
    let cert_path = settings
        .certificate_file
        .as_deref()
        .ok_or_else(|| TlsError::MissingCertificate(settings.host_name.clone()))?;
    if settings.certificate_key_password.is_some() {
        return Err(TlsError::EncryptedKeyUnsupported(settings.host_name.clone()));
    }

    let mut chain = load_certs(cert_path)?;
    if chain.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }
    if let Some(chain_path) = settings.certificate_chain_file.as_deref() {
        chain.extend(load_certs(chain_path)?);
    }

    let key_path = settings.certificate_key_file.as_deref().unwrap_or(cert_path);
    let key = load_private_key(key_path)?;
    Ok((chain, key))
}

fn load_trust_roots(settings: &TlsHostSettings) -> Result<RootCertStore, TlsError> {
    let mut files: Vec<PathBuf> = settings.ca_certificate_file.iter().cloned().collect();
    if let Some(dir) = settings.ca_certificate_path.as_deref() {
        let entries = std::fs::read_dir(dir).map_err(|source| TlsError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
    }

    let mut roots = RootCertStore::empty();
    for file in &files {
        for cert in load_certs(file)? {
            roots.add(cert)?;
        }
    }
    if roots.is_empty() {
        return Err(TlsError::MissingTrustMaterial(settings.host_name.clone()));
    }
    Ok(roots)
}

fn load_crls(
    settings: &TlsHostSettings,
) -> Result<Vec<CertificateRevocationListDer<'static>>, TlsError> {
    let Some(path) = settings.certificate_revocation_list_file.as_deref() else {
        return Ok(Vec::new());
    };
    let mut reader = open(path)?;
    rustls_pemfile::crls(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Assemble a rustls server configuration for one host identity.
///
/// `alpn_protocols` is the list to advertise, most preferred first.
pub fn build_server_config(
    identity: &TlsHostConfig,
    alpn_protocols: Vec<Vec<u8>>,
) -> Result<ServerConfig, TlsError> {
    let settings = identity.settings();
    let provider = Arc::new(crypto_provider(settings.ciphers.as_deref())?);
    let versions = protocol_versions(&settings.protocols)?;

    let builder =
        ServerConfig::builder_with_provider(provider.clone()).with_protocol_versions(&versions)?;

    let builder = match settings.certificate_verification {
        CertificateVerification::None => builder.with_no_client_auth(),
        verification => {
            let roots = load_trust_roots(&settings)?;
            let mut verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone());
            let crls = load_crls(&settings)?;
            if !crls.is_empty() {
                verifier = verifier.with_crls(crls);
            }
            if verification == CertificateVerification::Optional {
                verifier = verifier.allow_unauthenticated();
            }
            builder.with_client_cert_verifier(verifier.build()?)
        }
    };

    let (chain, key) = load_certified_key(&settings)?;
    let mut config = builder.with_single_cert(chain, key)?;

    config.alpn_protocols = alpn_protocols;
    config.ignore_client_order = settings.honor_cipher_order;
    if let Ok(size) = usize::try_from(settings.session_cache_size) {
        if size > 0 {
            config.session_storage = ServerSessionMemoryCache::new(size);
        }
    }
    if !settings.disable_session_tickets {
        config.ticketer = rustls::crypto::ring::Ticketer::new()?;
    }

    tracing::debug!(
        host = %settings.host_name,
        protocols = ?settings.protocols,
        alpn = config.alpn_protocols.len(),
        "Built TLS server configuration"
    );
    Ok(config)
}
