//! Configuration loading from disk.
//!
//! Relative paths in `[store]` and `[certificates]` are resolved against the
//! directory holding the config file, so a checkout can run with
//! `root = "data/nginx"` regardless of the working directory.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::EngineConfig;
use crate::config::validation::{validate_config, ValidationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: EngineConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(base) = path.parent() {
        resolve_paths(&mut config, base);
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn resolve_paths(config: &mut EngineConfig, base: &Path) {
    for path in [
        &mut config.store.root,
        &mut config.store.work_dir,
        &mut config.certificates.letsencrypt_dir,
        &mut config.certificates.custom_dir,
    ] {
        if path.is_relative() && !path.as_os_str().is_empty() {
            *path = base.join(&*path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host-sync.toml");

        fs::write(&path, "[scheduler]\ndebounce_ms = 250\n").unwrap();
        assert_eq!(load_config(&path).unwrap().scheduler.debounce_ms, 250);

        fs::write(&path, "[scheduler]\ndebounce_ms = \"soon\"\n").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));

        fs::write(&path, "[scheduler]\nreload_timeout_secs = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("scheduler.reload_timeout_secs"));

        assert!(matches!(
            load_config(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_relative_paths_follow_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host-sync.toml");
        fs::write(&path, "[store]\nroot = \"data/nginx\"\nwork_dir = \"/var/tmp/host-sync\"\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.store.root, dir.path().join("data/nginx"));
        assert_eq!(config.store.work_dir, PathBuf::from("/var/tmp/host-sync"));
        assert_eq!(config.certificates.custom_dir, PathBuf::from("/data/custom_ssl"));
    }
}
