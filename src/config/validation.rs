//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check command lines are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{CheckerKind, EngineConfig, ReloaderKind, PLACEHOLDER_API_KEY};
use crate::validate::checker::TREE_PLACEHOLDER;

/// One semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.store.root.as_os_str().is_empty() {
        errors.push(ValidationError::new("store.root", "must not be empty"));
    }
    if config.store.work_dir.as_os_str().is_empty() {
        errors.push(ValidationError::new("store.work_dir", "must not be empty"));
    }
    if config.store.work_dir == config.store.root {
        errors.push(ValidationError::new("store.work_dir", "must differ from store.root"));
    }

    if config.scheduler.check_timeout_secs == 0 {
        errors.push(ValidationError::new("scheduler.check_timeout_secs", "must be greater than 0"));
    }
    if config.scheduler.reload_timeout_secs == 0 {
        errors.push(ValidationError::new("scheduler.reload_timeout_secs", "must be greater than 0"));
    }

    if config.checker.kind == CheckerKind::Command {
        if config.checker.command.is_empty() {
            errors.push(ValidationError::new("checker.command", "must not be empty"));
        } else if !config.checker.command.iter().any(|arg| arg.contains(TREE_PLACEHOLDER)) {
            errors.push(ValidationError::new(
                "checker.command",
                format!("must reference the candidate tree as {}", TREE_PLACEHOLDER),
            ));
        }
    }

    if config.reloader.kind == ReloaderKind::Command && config.reloader.command.is_empty() {
        errors.push(ValidationError::new("reloader.command", "must not be empty"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address {:?}", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("invalid socket address {:?}", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.is_empty() || config.admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::new("admin.api_key", "must be set when the admin API is enabled"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
