//! Configuration checkers.
//!
//! A checker judges a materialized tree directory as a whole. It either
//! reports a verdict (`CheckReport`) or fails to produce one
//! (`CheckerError`); the two are never conflated.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::validate::command::{run_command, CommandError};
use crate::validate::syntax;

/// Placeholder replaced by the tree directory in checker command lines.
pub const TREE_PLACEHOLDER: &str = "{tree}";

/// Verdict on a candidate tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckReport {
    Passed,
    Failed { diagnostic: String },
}

impl CheckReport {
    pub fn is_passed(&self) -> bool {
        matches!(self, CheckReport::Passed)
    }
}

/// The checker could not judge the tree at all.
#[derive(Debug, Clone, Error)]
pub enum CheckerError {
    #[error("checker command failed: {0}")]
    Command(#[from] CommandError),

    #[error("failed to prepare candidate tree in {path:?}: {source}")]
    Scratch {
        path: std::path::PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("checker task failed: {0}")]
    Task(String),
}

/// Judges a complete configuration tree.
#[async_trait]
pub trait ConfigChecker: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Check the tree materialized under `tree_dir`.
    async fn check(&self, tree_dir: &Path) -> Result<CheckReport, CheckerError>;
}

/// In-process lexical checker. Needs no nginx binary.
#[derive(Debug, Clone, Default)]
pub struct SyntaxChecker;

#[async_trait]
impl ConfigChecker for SyntaxChecker {
    fn name(&self) -> &'static str {
        "builtin"
    }

    async fn check(&self, tree_dir: &Path) -> Result<CheckReport, CheckerError> {
        let dir = tree_dir.to_path_buf();
        let result = tokio::task::spawn_blocking(move || syntax::check_tree(&dir))
            .await
            .map_err(|e| CheckerError::Task(e.to_string()))?;

        match result {
            Ok(()) => Ok(CheckReport::Passed),
            Err(syntax::TreeError::Syntax(e)) => Ok(CheckReport::Failed {
                diagnostic: e.to_string(),
            }),
            Err(syntax::TreeError::Io { path, source }) => Err(CheckerError::Scratch {
                path,
                source: Arc::new(source),
            }),
        }
    }
}

/// Runs the server's own check command, e.g. `nginx -t -q -c {tree}/nginx.conf`.
#[derive(Debug, Clone)]
pub struct CommandChecker {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandChecker {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    fn command_line(&self, tree_dir: &Path) -> Vec<String> {
        let tree = tree_dir.display().to_string();
        self.argv
            .iter()
            .map(|arg| arg.replace(TREE_PLACEHOLDER, &tree))
            .collect()
    }
}

#[async_trait]
impl ConfigChecker for CommandChecker {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn check(&self, tree_dir: &Path) -> Result<CheckReport, CheckerError> {
        let output = run_command(&self.command_line(tree_dir), self.timeout).await?;
        if output.status.success() {
            return Ok(CheckReport::Passed);
        }

        // Scratch paths are meaningless to the caller; report tree-relative ones.
        let prefix = format!("{}/", tree_dir.display());
        Ok(CheckReport::Failed {
            diagnostic: output.diagnostic().replace(&prefix, ""),
        })
    }
}
