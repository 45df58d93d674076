//! Last known outcome per host, persisted across restarts.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use crate::host::HostKey;
use crate::status::outcome::{CommitOutcome, CommitStatus};
use crate::store::atomic::write_atomic;

/// File name of the persisted outcomes under the store root.
pub const STATUS_FILE: &str = "host-sync-status.json";

/// A thread-safe map of the last outcome per host.
#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    inner: Arc<DashMap<HostKey, CommitOutcome>>,
    persistence_path: Option<PathBuf>,
}

impl StatusReporter {
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            persistence_path,
        }
    }

    /// Load outcomes from `path` if it exists; later saves go to the same file.
    pub fn load_from_file(path: &Path) -> io::Result<Self> {
        let reporter = Self::new(Some(path.to_path_buf()));
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let outcomes: Vec<CommitOutcome> = serde_json::from_reader(reader)?;
            for outcome in outcomes.into_iter().filter(|o| !o.is_removal()) {
                reporter.inner.insert(outcome.key, outcome);
            }
            tracing::info!(path = ?path, hosts = reporter.inner.len(), "Loaded host status");
        }
        Ok(reporter)
    }

    /// Persist every outcome. A no-op without a persistence path.
    pub fn save_to_file(&self) -> io::Result<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        let outcomes = self.all();
        let json = serde_json::to_vec_pretty(&outcomes)?;
        write_atomic(path, &json)?;
        tracing::debug!(path = ?path, hosts = outcomes.len(), "Saved host status");
        Ok(())
    }

    /// Store `outcome` as the host's latest. A committed removal forgets the
    /// host instead.
    pub fn record(&self, outcome: CommitOutcome) {
        tracing::debug!(
            key = %outcome.key,
            status = outcome.status.as_str(),
            removed = outcome.removed,
            "Recorded outcome"
        );
        if outcome.is_removal() {
            self.inner.remove(&outcome.key);
        } else {
            self.inner.insert(outcome.key, outcome);
        }
    }

    pub fn get(&self, key: &HostKey) -> Option<CommitOutcome> {
        self.inner.get(key).map(|r| r.value().clone())
    }

    /// All outcomes in key order.
    pub fn all(&self) -> Vec<CommitOutcome> {
        let mut outcomes: Vec<_> = self.inner.iter().map(|r| r.value().clone()).collect();
        outcomes.sort_by_key(|o| o.key);
        outcomes
    }

    /// Count of (active, errored) hosts.
    pub fn summary(&self) -> (usize, usize) {
        let mut active = 0;
        let mut errored = 0;
        for r in self.inner.iter() {
            match r.value().status {
                CommitStatus::Active => active += 1,
                CommitStatus::Errored => errored += 1,
            }
        }
        (active, errored)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
