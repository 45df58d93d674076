//! Host record schema.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four kinds of virtual host the engine knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostType {
    Proxy,
    Redirection,
    Dead,
    Stream,
}

impl HostType {
    /// Every host type, in tree order.
    pub const ALL: [HostType; 4] = [
        HostType::Proxy,
        HostType::Redirection,
        HostType::Dead,
        HostType::Stream,
    ];

    /// Short name used in records and on the admin API.
    pub fn as_str(self) -> &'static str {
        match self {
            HostType::Proxy => "proxy",
            HostType::Redirection => "redirection",
            HostType::Dead => "dead",
            HostType::Stream => "stream",
        }
    }

    /// Directory holding this type's files inside the config tree.
    pub fn dir_name(self) -> &'static str {
        match self {
            HostType::Proxy => "proxy_host",
            HostType::Redirection => "redirection_host",
            HostType::Dead => "dead_host",
            HostType::Stream => "stream",
        }
    }

    /// HTTP hosts are matched by `server_name` and need at least one domain.
    /// Streams are matched by port only.
    pub fn is_http(self) -> bool {
        !matches!(self, HostType::Stream)
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a host type or key from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid host key: {0:?}")]
pub struct ParseHostKeyError(pub String);

impl FromStr for HostType {
    type Err = ParseHostKeyError;

    /// Accepts both the short name (`proxy`) and the directory name (`proxy_host`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HostType::ALL
            .into_iter()
            .find(|t| t.as_str() == s || t.dir_name() == s)
            .ok_or_else(|| ParseHostKeyError(s.to_string()))
    }
}

/// Identity of one host's configuration artifact: `(type, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostKey {
    #[serde(rename = "type")]
    pub host_type: HostType,
    pub id: u64,
}

impl HostKey {
    pub fn new(host_type: HostType, id: u64) -> Self {
        Self { host_type, id }
    }

    /// Path of the active config file relative to the tree root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.host_type.dir_name()).join(format!("{}.conf", self.id))
    }

    /// Path of the rejected-candidate file relative to the tree root.
    pub fn rejected_path(&self) -> PathBuf {
        PathBuf::from(self.host_type.dir_name()).join(format!("{}.conf.err", self.id))
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host_type.dir_name(), self.id)
    }
}

impl FromStr for HostKey {
    type Err = ParseHostKeyError;

    /// Parses `proxy_host/1` or `proxy/1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once('/')
            .ok_or_else(|| ParseHostKeyError(s.to_string()))?;
        let host_type = kind.parse()?;
        let id = id.parse().map_err(|_| ParseHostKeyError(s.to_string()))?;
        Ok(Self { host_type, id })
    }
}

/// Immutable snapshot of one host definition.
///
/// Serialized flat, with the type tag next to the common fields:
///
/// ```json
/// {"id": 1, "type": "proxy", "domain_names": ["a.example"],
///  "forward_scheme": "http", "forward_host": "10.0.0.2", "forward_port": 8080}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: u64,

    /// Names matched by `server_name`. Ignored for streams.
    #[serde(default)]
    pub domain_names: BTreeSet<String>,

    /// Reference to an already-issued certificate.
    #[serde(default)]
    pub certificate_id: Option<u64>,

    /// Trusted directive text spliced verbatim into the rendered config.
    #[serde(default)]
    pub advanced_config: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Free-form metadata owned by the persistence layer.
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,

    /// TLS options, applied only when a certificate resolves.
    #[serde(default)]
    pub tls: TlsOptions,

    #[serde(flatten)]
    pub kind: HostKind,
}

fn default_enabled() -> bool {
    true
}

impl HostRecord {
    pub fn host_type(&self) -> HostType {
        self.kind.host_type()
    }

    pub fn key(&self) -> HostKey {
        HostKey::new(self.host_type(), self.id)
    }
}

/// Type tag plus the settings that only make sense for that type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostKind {
    Proxy(ProxySettings),
    Redirection(RedirectionSettings),
    Dead,
    Stream(StreamSettings),
}

impl HostKind {
    pub fn host_type(&self) -> HostType {
        match self {
            HostKind::Proxy(_) => HostType::Proxy,
            HostKind::Redirection(_) => HostType::Redirection,
            HostKind::Dead => HostType::Dead,
            HostKind::Stream(_) => HostType::Stream,
        }
    }
}

/// Upstream scheme for proxy hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardScheme {
    #[default]
    Http,
    Https,
}

impl ForwardScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            ForwardScheme::Http => "http",
            ForwardScheme::Https => "https",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub forward_scheme: ForwardScheme,
    pub forward_host: String,
    pub forward_port: u16,
    #[serde(default)]
    pub caching_enabled: bool,
    #[serde(default)]
    pub block_exploits: bool,
    #[serde(default)]
    pub allow_websocket_upgrade: bool,
}

/// Target scheme for redirections. `Auto` keeps the request's scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectScheme {
    #[default]
    Auto,
    Http,
    Https,
}

impl RedirectScheme {
    /// Value as it appears in a `return` directive.
    pub fn directive_value(self) -> &'static str {
        match self {
            RedirectScheme::Auto => "$scheme",
            RedirectScheme::Http => "http",
            RedirectScheme::Https => "https",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectionSettings {
    #[serde(default = "default_redirect_code")]
    pub forward_http_code: u16,
    #[serde(default)]
    pub forward_scheme: RedirectScheme,
    pub forward_domain_name: String,
    #[serde(default)]
    pub preserve_path: bool,
}

fn default_redirect_code() -> u16 {
    301
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub incoming_port: u16,
    pub forwarding_host: String,
    pub forwarding_port: u16,
    #[serde(default = "default_tcp")]
    pub tcp_forwarding: bool,
    #[serde(default)]
    pub udp_forwarding: bool,
}

fn default_tcp() -> bool {
    true
}

/// TLS behavior of HTTP hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// Redirect plain HTTP to HTTPS.
    pub ssl_forced: bool,
    pub http2_support: bool,
    pub hsts_enabled: bool,
    pub hsts_subdomains: bool,
}
