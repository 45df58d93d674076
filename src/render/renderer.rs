//! Host record → configuration text.

use std::sync::atomic::{AtomicU64, Ordering};

use handlebars::Handlebars;
use serde_json::{json, Value};
use thiserror::Error;

use crate::host::{HostKey, HostKind, HostRecord, HostType, ResolvedCertificate, TlsOptions};

const PROXY_HOST_TEMPLATE: &str = include_str!("templates/proxy_host.hbs");
const REDIRECTION_HOST_TEMPLATE: &str = include_str!("templates/redirection_host.hbs");
const DEAD_HOST_TEMPLATE: &str = include_str!("templates/dead_host.hbs");
const STREAM_TEMPLATE: &str = include_str!("templates/stream.hbs");

/// Redirect codes a redirection host may use.
const REDIRECT_CODES: [u16; 4] = [301, 302, 307, 308];

const HSTS_MAX_AGE: &str = "max-age=63072000";

/// Structurally invalid host input. Raised before anything is staged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// HTTP host without any domain name.
    #[error("{key}: at least one domain name is required")]
    MissingDomains { key: HostKey },

    /// Domain name that would break out of the `server_name` directive.
    #[error("{key}: invalid domain name {domain:?}")]
    InvalidDomain { key: HostKey, domain: String },

    /// Empty or malformed upstream/redirect target.
    #[error("{key}: invalid forward host {host:?}")]
    InvalidForwardHost { key: HostKey, host: String },

    #[error("{key}: {field} must be a non-zero port")]
    InvalidPort { key: HostKey, field: &'static str },

    #[error("{key}: unsupported redirect code {code}")]
    UnsupportedRedirectCode { key: HostKey, code: u16 },

    #[error("{key}: stream forwards neither TCP nor UDP")]
    NoStreamProtocol { key: HostKey },

    /// A built-in template failed to compile.
    #[error("template {name} failed to compile: {message}")]
    Compile { name: &'static str, message: String },

    #[error("{key}: rendering failed: {message}")]
    Render { key: HostKey, message: String },
}

/// Rendered configuration for a single host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub key: HostKey,
    pub content: String,
    /// Monotonic render counter; orders renders of the same key.
    pub source_version: u64,
}

/// Renders host records with one compiled template per host type.
pub struct Renderer {
    registry: Handlebars<'static>,
    next_version: AtomicU64,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("next_version", &self.next_version)
            .finish_non_exhaustive()
    }
}

impl Renderer {
    /// Compile the built-in templates.
    pub fn new() -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        // Output is nginx config, not HTML.
        registry.register_escape_fn(handlebars::no_escape);

        for host_type in HostType::ALL {
            let name = host_type.dir_name();
            registry
                .register_template_string(name, template_source(host_type))
                .map_err(|e| TemplateError::Compile {
                    name,
                    message: e.to_string(),
                })?;
        }

        Ok(Self {
            registry,
            next_version: AtomicU64::new(1),
        })
    }

    /// Render one host.
    ///
    /// The content depends only on `host` and `cert`; only `source_version`
    /// differs between two renders of the same input.
    pub fn render(
        &self,
        host: &HostRecord,
        cert: Option<&ResolvedCertificate>,
    ) -> Result<RenderedConfig, TemplateError> {
        let key = host.key();
        let data = template_data(host, cert)?;
        let content = self
            .registry
            .render(key.host_type.dir_name(), &data)
            .map_err(|e| TemplateError::Render {
                key,
                message: e.to_string(),
            })?;
        let source_version = self.next_version.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(key = %key, version = source_version, bytes = content.len(), "Rendered host");

        Ok(RenderedConfig {
            key,
            content,
            source_version,
        })
    }
}

fn template_source(host_type: HostType) -> &'static str {
    match host_type {
        HostType::Proxy => PROXY_HOST_TEMPLATE,
        HostType::Redirection => REDIRECTION_HOST_TEMPLATE,
        HostType::Dead => DEAD_HOST_TEMPLATE,
        HostType::Stream => STREAM_TEMPLATE,
    }
}

/// Build the template context. Every variable a template references is
/// always present.
fn template_data(host: &HostRecord, cert: Option<&ResolvedCertificate>) -> Result<Value, TemplateError> {
    let key = host.key();
    let ssl = cert.map(|c| ssl_data(&host.tls, c)).unwrap_or(Value::Null);

    match &host.kind {
        HostKind::Proxy(proxy) => {
            let server_names = server_names(key, host)?;
            check_target(key, &proxy.forward_host)?;
            check_port(key, "forward_port", proxy.forward_port)?;
            Ok(json!({
                "id": host.id,
                "server_names": server_names,
                "ssl": ssl,
                "forward_scheme": proxy.forward_scheme.as_str(),
                "forward_host": proxy.forward_host,
                "forward_port": proxy.forward_port,
                "caching_enabled": proxy.caching_enabled,
                "block_exploits": proxy.block_exploits,
                "allow_websocket_upgrade": proxy.allow_websocket_upgrade,
                "advanced_config": host.advanced_config,
            }))
        }
        HostKind::Redirection(redirect) => {
            let server_names = server_names(key, host)?;
            check_target(key, &redirect.forward_domain_name)?;
            if !REDIRECT_CODES.contains(&redirect.forward_http_code) {
                return Err(TemplateError::UnsupportedRedirectCode {
                    key,
                    code: redirect.forward_http_code,
                });
            }
            Ok(json!({
                "id": host.id,
                "server_names": server_names,
                "ssl": ssl,
                "forward_http_code": redirect.forward_http_code,
                "forward_scheme": redirect.forward_scheme.directive_value(),
                "forward_domain_name": redirect.forward_domain_name,
                "preserve_path": redirect.preserve_path,
                "advanced_config": host.advanced_config,
            }))
        }
        HostKind::Dead => {
            let server_names = server_names(key, host)?;
            Ok(json!({
                "id": host.id,
                "server_names": server_names,
                "ssl": ssl,
                "advanced_config": host.advanced_config,
            }))
        }
        HostKind::Stream(stream) => {
            check_port(key, "incoming_port", stream.incoming_port)?;
            check_port(key, "forwarding_port", stream.forwarding_port)?;
            check_target(key, &stream.forwarding_host)?;
            if !stream.tcp_forwarding && !stream.udp_forwarding {
                return Err(TemplateError::NoStreamProtocol { key });
            }
            Ok(json!({
                "id": host.id,
                "incoming_port": stream.incoming_port,
                "forwarding_host": stream.forwarding_host,
                "forwarding_port": stream.forwarding_port,
                "tcp_forwarding": stream.tcp_forwarding,
                "udp_forwarding": stream.udp_forwarding,
                "advanced_config": host.advanced_config,
            }))
        }
    }
}

fn ssl_data(tls: &TlsOptions, cert: &ResolvedCertificate) -> Value {
    let hsts = if !tls.hsts_enabled {
        Value::Null
    } else if tls.hsts_subdomains {
        Value::String(format!("{}; includeSubDomains; preload", HSTS_MAX_AGE))
    } else {
        Value::String(format!("{}; preload", HSTS_MAX_AGE))
    };

    json!({
        "certificate": cert.certificate_path.display().to_string(),
        "key": cert.key_path.display().to_string(),
        "http2": tls.http2_support,
        "forced": tls.ssl_forced,
        "hsts": hsts,
    })
}

/// Space-separated `server_name` value. `domain_names` is a sorted set, so
/// the order is stable.
fn server_names(key: HostKey, host: &HostRecord) -> Result<String, TemplateError> {
    if host.domain_names.is_empty() {
        return Err(TemplateError::MissingDomains { key });
    }
    for domain in &host.domain_names {
        if !is_plain_token(domain) {
            return Err(TemplateError::InvalidDomain {
                key,
                domain: domain.clone(),
            });
        }
    }
    Ok(host
        .domain_names
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" "))
}

fn check_target(key: HostKey, host: &str) -> Result<(), TemplateError> {
    if is_plain_token(host) {
        Ok(())
    } else {
        Err(TemplateError::InvalidForwardHost {
            key,
            host: host.to_string(),
        })
    }
}

fn check_port(key: HostKey, field: &'static str, port: u16) -> Result<(), TemplateError> {
    if port == 0 {
        Err(TemplateError::InvalidPort { key, field })
    } else {
        Ok(())
    }
}

/// A value that stays a single nginx token when spliced into a directive.
fn is_plain_token(value: &str) -> bool {
    !value.is_empty()
        && !value.chars().any(|c| {
            c.is_whitespace() || c.is_control() || matches!(c, ';' | '{' | '}' | '"' | '\'' | '#' | '\\' | '$')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{
        CertificateProvider, ForwardScheme, ProxySettings, RedirectScheme, RedirectionSettings,
        StreamSettings,
    };
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn record(id: u64, domains: &[&str], kind: HostKind) -> HostRecord {
        HostRecord {
            id,
            domain_names: domains.iter().map(|d| d.to_string()).collect::<BTreeSet<_>>(),
            certificate_id: None,
            advanced_config: String::new(),
            enabled: true,
            meta: Default::default(),
            tls: TlsOptions::default(),
            kind,
        }
    }

    fn proxy(id: u64, domains: &[&str]) -> HostRecord {
        record(
            id,
            domains,
            HostKind::Proxy(ProxySettings {
                forward_scheme: ForwardScheme::Http,
                forward_host: "10.0.0.2".into(),
                forward_port: 8080,
                caching_enabled: false,
                block_exploits: false,
                allow_websocket_upgrade: false,
            }),
        )
    }

    fn cert() -> ResolvedCertificate {
        ResolvedCertificate {
            id: 3,
            provider: CertificateProvider::Letsencrypt,
            certificate_path: PathBuf::from("/etc/letsencrypt/live/npm-3/fullchain.pem"),
            key_path: PathBuf::from("/etc/letsencrypt/live/npm-3/privkey.pem"),
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let renderer = Renderer::new().unwrap();
        let host = proxy(1, &["b.example", "a.example"]);

        let first = renderer.render(&host, None).unwrap();
        let second = renderer.render(&host, None).unwrap();

        assert_eq!(first.content, second.content);
        assert!(second.source_version > first.source_version);
        assert!(first.content.contains("server_name a.example b.example;"));
    }

    #[test]
    fn test_proxy_skeleton() {
        let renderer = Renderer::new().unwrap();
        let rendered = renderer.render(&proxy(1, &["a.example"]), None).unwrap();

        assert_eq!(rendered.key, HostKey::new(HostType::Proxy, 1));
        assert!(rendered.content.contains("listen 80;"));
        assert!(rendered.content.contains("set $server \"10.0.0.2\";"));
        assert!(rendered.content.contains("set $port 8080;"));
        assert!(rendered.content.contains("proxy_pass $forward_scheme://$server:$port;"));
        assert!(!rendered.content.contains("ssl_certificate"));
    }

    #[test]
    fn test_advanced_config_spliced_verbatim() {
        let renderer = Renderer::new().unwrap();
        let mut host = proxy(1, &["a.example"]);
        host.advanced_config = "garbage{{{ \"<b>\" & $x".into();

        let rendered = renderer.render(&host, None).unwrap();
        assert!(rendered.content.contains("garbage{{{ \"<b>\" & $x"));
    }

    #[test]
    fn test_tls_block_only_with_certificate() {
        let renderer = Renderer::new().unwrap();
        let mut host = proxy(1, &["a.example"]);
        host.tls = TlsOptions {
            ssl_forced: true,
            http2_support: true,
            hsts_enabled: true,
            hsts_subdomains: true,
        };

        let plain = renderer.render(&host, None).unwrap();
        assert!(!plain.content.contains("listen 443"));
        assert!(!plain.content.contains("Strict-Transport-Security"));

        let secure = renderer.render(&host, Some(&cert())).unwrap();
        assert!(secure.content.contains("listen 443 ssl http2;"));
        assert!(secure
            .content
            .contains("ssl_certificate /etc/letsencrypt/live/npm-3/fullchain.pem;"));
        assert!(secure.content.contains("return 301 https://$host$request_uri;"));
        assert!(secure.content.contains("includeSubDomains"));
    }

    #[test]
    fn test_http_hosts_require_domains() {
        let renderer = Renderer::new().unwrap();
        let err = renderer.render(&proxy(1, &[]), None).unwrap_err();
        assert!(matches!(err, TemplateError::MissingDomains { .. }));

        let dead = record(2, &[], HostKind::Dead);
        assert!(matches!(
            renderer.render(&dead, None),
            Err(TemplateError::MissingDomains { .. })
        ));
    }

    #[test]
    fn test_rejects_domain_with_metacharacters() {
        let renderer = Renderer::new().unwrap();
        let err = renderer
            .render(&proxy(1, &["a.example; include /etc/passwd"]), None)
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidDomain { .. }));
    }

    #[test]
    fn test_redirection_target() {
        let renderer = Renderer::new().unwrap();
        let host = record(
            2,
            &["b.example"],
            HostKind::Redirection(RedirectionSettings {
                forward_http_code: 302,
                forward_scheme: RedirectScheme::Auto,
                forward_domain_name: "c.example".into(),
                preserve_path: true,
            }),
        );

        let rendered = renderer.render(&host, None).unwrap();
        assert!(rendered
            .content
            .contains("return 302 $scheme://c.example$request_uri;"));
    }

    #[test]
    fn test_redirection_rejects_unknown_code() {
        let renderer = Renderer::new().unwrap();
        let host = record(
            2,
            &["b.example"],
            HostKind::Redirection(RedirectionSettings {
                forward_http_code: 200,
                forward_scheme: RedirectScheme::Https,
                forward_domain_name: "c.example".into(),
                preserve_path: false,
            }),
        );
        assert!(matches!(
            renderer.render(&host, None),
            Err(TemplateError::UnsupportedRedirectCode { code: 200, .. })
        ));
    }

    #[test]
    fn test_stream_listeners() {
        let renderer = Renderer::new().unwrap();
        let mut settings = StreamSettings {
            incoming_port: 2222,
            forwarding_host: "10.0.0.9".into(),
            forwarding_port: 22,
            tcp_forwarding: true,
            udp_forwarding: true,
        };
        let host = record(4, &[], HostKind::Stream(settings.clone()));

        let rendered = renderer.render(&host, None).unwrap();
        assert!(rendered.content.contains("listen 2222;"));
        assert!(rendered.content.contains("listen 2222 udp;"));
        assert!(rendered.content.contains("proxy_pass 10.0.0.9:22;"));

        settings.tcp_forwarding = false;
        settings.udp_forwarding = false;
        let host = record(4, &[], HostKind::Stream(settings));
        assert!(matches!(
            renderer.render(&host, None),
            Err(TemplateError::NoStreamProtocol { .. })
        ));
    }
}
