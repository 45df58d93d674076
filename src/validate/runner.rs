//! Whole-tree validation and offender isolation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::host::HostKey;
use crate::store::{ConfigFileStore, ConfigTree};
use crate::validate::checker::{CheckReport, CheckerError, ConfigChecker};

/// The candidate tree was judged invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("configuration check failed: {diagnostic}")]
pub struct ValidationError {
    pub diagnostic: String,
}

#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Checker(#[from] CheckerError),
}

/// Keys of a cycle split by whether their candidate may be committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Isolation {
    pub accepted: Vec<HostKey>,
    /// Rejected keys with the diagnostic of the pass that excluded them.
    pub rejected: Vec<(HostKey, String)>,
}

/// Materializes candidate trees into scratch directories and runs the
/// configured checker over them.
pub struct ValidationRunner {
    checker: Arc<dyn ConfigChecker>,
    work_dir: PathBuf,
}

impl std::fmt::Debug for ValidationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationRunner")
            .field("checker", &self.checker.name())
            .field("work_dir", &self.work_dir)
            .finish()
    }
}

impl ValidationRunner {
    pub fn new(checker: Arc<dyn ConfigChecker>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            checker,
            work_dir: work_dir.into(),
        }
    }

    /// Validate `tree` as one unit.
    pub async fn validate(&self, tree: &ConfigTree) -> Result<(), RunnerError> {
        let scratch = ScratchDir::create(&self.work_dir)?;

        let owned = tree.clone();
        let path = scratch.path.clone();
        tokio::task::spawn_blocking(move || owned.materialize(&path))
            .await
            .map_err(|e| CheckerError::Task(e.to_string()))?
            .map_err(|e| CheckerError::Scratch {
                path: scratch.path.clone(),
                source: Arc::new(e),
            })?;

        let report = self.checker.check(&scratch.path).await?;
        tracing::debug!(
            checker = self.checker.name(),
            hosts = tree.len(),
            passed = report.is_passed(),
            "Validated candidate tree"
        );

        match report {
            CheckReport::Passed => Ok(()),
            CheckReport::Failed { diagnostic } => Err(ValidationError { diagnostic }.into()),
        }
    }

    /// Decide which claimed candidates of `keys` can be committed.
    ///
    /// The whole batch is tried first. If it fails, each key is retried in
    /// key order on top of the active tree plus the keys accepted so far, so
    /// the accepted set always validates as a whole.
    pub async fn isolate(
        &self,
        store: &ConfigFileStore,
        keys: &[HostKey],
    ) -> Result<Isolation, CheckerError> {
        if keys.is_empty() {
            return Ok(Isolation::default());
        }

        let diagnostic = match self.validate(&store.snapshot_tree_with(keys)).await {
            Ok(()) => {
                return Ok(Isolation {
                    accepted: keys.to_vec(),
                    rejected: Vec::new(),
                })
            }
            Err(RunnerError::Checker(e)) => return Err(e),
            Err(RunnerError::Invalid(e)) => e.diagnostic,
        };

        if let [key] = keys {
            return Ok(Isolation {
                accepted: Vec::new(),
                rejected: vec![(*key, diagnostic)],
            });
        }

        tracing::info!(keys = keys.len(), "Batch failed validation, isolating offenders");

        let mut sorted = keys.to_vec();
        sorted.sort();

        let mut isolation = Isolation::default();
        for key in sorted {
            let mut trial = isolation.accepted.clone();
            trial.push(key);
            match self.validate(&store.snapshot_tree_with(&trial)).await {
                Ok(()) => isolation.accepted.push(key),
                Err(RunnerError::Invalid(e)) => {
                    tracing::warn!(key = %key, diagnostic = %e.diagnostic, "Candidate rejected");
                    isolation.rejected.push((key, e.diagnostic));
                }
                Err(RunnerError::Checker(e)) => return Err(e),
            }
        }
        Ok(isolation)
    }

    /// Entries of an already-committed `tree` that keep it from validating,
    /// with the diagnostic that excluded each.
    ///
    /// Entries are added one at a time in key order on top of those already
    /// kept. If even the empty tree fails, the checker environment itself is
    /// broken and nothing is blamed on the entries.
    pub async fn offenders(&self, tree: &ConfigTree) -> Result<Vec<(HostKey, String)>, CheckerError> {
        match self.validate(tree).await {
            Ok(()) => return Ok(Vec::new()),
            Err(RunnerError::Checker(e)) => return Err(e),
            Err(RunnerError::Invalid(e)) => {
                tracing::warn!(hosts = tree.len(), diagnostic = %e.diagnostic, "Active tree failed validation");
            }
        }

        match self.validate(&ConfigTree::new()).await {
            Ok(()) => {}
            Err(RunnerError::Checker(e)) => return Err(e),
            Err(RunnerError::Invalid(e)) => {
                tracing::error!(diagnostic = %e.diagnostic, "Empty tree fails validation, not blaming host files");
                return Ok(Vec::new());
            }
        }

        let mut kept = ConfigTree::new();
        let mut offenders = Vec::new();
        for (key, content) in tree.iter() {
            let mut trial = kept.clone();
            trial.insert(*key, Arc::from(content));
            match self.validate(&trial).await {
                Ok(()) => kept = trial,
                Err(RunnerError::Invalid(e)) => offenders.push((*key, e.diagnostic)),
                Err(RunnerError::Checker(e)) => return Err(e),
            }
        }
        Ok(offenders)
    }
}

/// Scratch directory under the work dir, removed on drop.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(work_dir: &Path) -> Result<Self, CheckerError> {
        let path = work_dir.join(format!("candidate-{}", Uuid::new_v4()));
        fs::create_dir_all(&path).map_err(|e| CheckerError::Scratch {
            path: path.clone(),
            source: Arc::new(e),
        })?;
        Ok(Self { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            tracing::warn!(path = ?self.path, error = %e, "Failed to remove scratch tree");
        }
    }
}
