//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for host-sync.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Where host configs live and where candidate trees are checked.
    pub store: StoreConfig,

    /// Commit cycle timing.
    pub scheduler: SchedulerConfig,

    /// How candidate trees are validated.
    pub checker: CheckerConfig,

    /// How the server is told to reload.
    pub reloader: ReloaderConfig,

    /// Certificate directories.
    pub certificates: CertificateConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Config tree locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of the live tree (`proxy_host/`, `redirection_host/`, ...).
    pub root: PathBuf,

    /// Scratch space for candidate trees. Must be writable.
    pub work_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/data/nginx"),
            work_dir: PathBuf::from("/tmp/host-sync"),
        }
    }
}

/// Commit cycle timing. The only section applied on hot reload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Time to collect further requests after the first one of a cycle.
    pub debounce_ms: u64,

    /// Deadline for one checker run.
    pub check_timeout_secs: u64,

    /// Deadline for one reload command.
    pub reload_timeout_secs: u64,
}

impl SchedulerConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            check_timeout_secs: 30,
            reload_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckerKind {
    /// In-process lexical checks.
    Builtin,
    /// Run an external command, normally `nginx -t`.
    Command,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub kind: CheckerKind,

    /// Argv for the `command` kind; `{tree}` is replaced by the candidate
    /// tree directory.
    pub command: Vec<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            kind: CheckerKind::Command,
            command: vec![
                "nginx".to_string(),
                "-t".to_string(),
                "-q".to_string(),
                "-c".to_string(),
                "{tree}/nginx.conf".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloaderKind {
    Command,
    /// Never reload; the tree is written only.
    Noop,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReloaderConfig {
    pub kind: ReloaderKind,

    /// Argv for the `command` kind.
    pub command: Vec<String>,
}

impl Default for ReloaderConfig {
    fn default() -> Self {
        Self {
            kind: ReloaderKind::Command,
            command: vec!["nginx".to_string(), "-s".to_string(), "reload".to_string()],
        }
    }
}

/// Where issued certificates are found, as `<dir>/npm-<id>/fullchain.pem`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CertificateConfig {
    pub letsencrypt_dir: PathBuf,
    pub custom_dir: PathBuf,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            letsencrypt_dir: PathBuf::from("/etc/letsencrypt/live"),
            custom_dir: PathBuf::from("/data/custom_ssl"),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Read-only admin API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    pub bind_address: String,
}

/// Default admin key; rejected by validation when the admin API is enabled.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
