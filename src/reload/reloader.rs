//! Physical reload of the reverse-proxy process.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::validate::command::run_command;

/// The server did not accept the reload request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reload failed: {diagnostic}")]
pub struct ReloadError {
    pub diagnostic: String,
}

/// Tells the running server to pick up the active tree.
#[async_trait]
pub trait Reloader: Send + Sync {
    fn name(&self) -> &'static str;

    async fn reload(&self) -> Result<(), ReloadError>;
}

/// Runs a reload command such as `nginx -s reload`.
#[derive(Debug, Clone)]
pub struct CommandReloader {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandReloader {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }
}

#[async_trait]
impl Reloader for CommandReloader {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn reload(&self) -> Result<(), ReloadError> {
        let output = run_command(&self.argv, self.timeout)
            .await
            .map_err(|e| ReloadError {
                diagnostic: e.to_string(),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ReloadError {
                diagnostic: output.diagnostic(),
            })
        }
    }
}

/// Skips the reload. For trees consumed by something other than a live
/// server, and for dry runs.
#[derive(Debug, Clone, Default)]
pub struct NoopReloader;

#[async_trait]
impl Reloader for NoopReloader {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn reload(&self) -> Result<(), ReloadError> {
        tracing::debug!("Reload skipped (noop reloader)");
        Ok(())
    }
}
