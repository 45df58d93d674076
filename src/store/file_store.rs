//! Staged/active artifact store backed by the config directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::host::{HostKey, HostType};
use crate::store::atomic::{remove_if_exists, write_atomic, TEMP_SUFFIX};
use crate::store::tree::ConfigTree;

/// Errors from the config store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// No claimed candidate exists for the key in the current cycle.
    #[error("{0}: no claimed candidate to commit")]
    NotClaimed(HostKey),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }
}

/// A candidate awaiting commit. `content: None` stages a removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedCandidate {
    pub content: Option<Arc<str>>,
    /// Store-wide staging counter; a higher version is a newer candidate.
    pub version: u64,
}

impl StagedCandidate {
    pub fn is_removal(&self) -> bool {
        self.content.is_none()
    }
}

/// Point-in-time view of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigArtifact {
    pub key: HostKey,
    /// Last validated-and-committed content.
    pub active: Option<Arc<str>>,
    /// Newest uncommitted candidate, if any.
    pub staged: Option<StagedCandidate>,
}

/// Maps host keys to their active file and staged candidate.
///
/// Candidates move through three places:
/// - `staged`: written by callers, last write wins per key
/// - `claimed`: taken by the running commit cycle; new `stage` calls for the
///   same key land in `staged` again and wait for the next cycle
/// - `active`: promoted by `commit`, written to disk with an atomic rename
///
/// Only the commit cycle calls `claim`, `commit` and `rollback`.
#[derive(Debug)]
pub struct ConfigFileStore {
    root: PathBuf,
    work_dir: PathBuf,
    active: ArcSwap<ConfigTree>,
    staged: DashMap<HostKey, StagedCandidate>,
    claimed: DashMap<HostKey, StagedCandidate>,
    next_version: AtomicU64,
}

impl ConfigFileStore {
    /// Open the tree under `root`, loading every existing `<type>/<id>.conf`
    /// as active content. `work_dir` holds scratch trees for validation.
    ///
    /// Loaded files are not validated here; the commit worker checks them
    /// before its first cycle and quarantines the ones that fail.
    pub fn open(root: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let work_dir = work_dir.into();

        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        fs::create_dir_all(&work_dir).map_err(|e| StoreError::io(&work_dir, e))?;
        // Materialized trees include files by absolute path.
        let root = fs::canonicalize(&root).map_err(|e| StoreError::io(&root, e))?;
        let work_dir = fs::canonicalize(&work_dir).map_err(|e| StoreError::io(&work_dir, e))?;

        let mut tree = ConfigTree::new();
        for host_type in HostType::ALL {
            load_type_dir(&root, host_type, &mut tree)?;
        }

        tracing::info!(root = ?root, hosts = tree.len(), "Config store opened");

        Ok(Self {
            root,
            work_dir,
            active: ArcSwap::from_pointee(tree),
            staged: DashMap::new(),
            claimed: DashMap::new(),
            next_version: AtomicU64::new(1),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Stage `content` for `key`, superseding any unclaimed candidate.
    /// Returns the candidate's version.
    pub fn stage(&self, key: HostKey, content: impl Into<Arc<str>>) -> u64 {
        self.put_staged(key, Some(content.into()))
    }

    /// Stage the removal of `key`.
    pub fn stage_removal(&self, key: HostKey) -> u64 {
        self.put_staged(key, None)
    }

    fn put_staged(&self, key: HostKey, content: Option<Arc<str>>) -> u64 {
        // Allocate the version under the shard lock so per-key write order and
        // version order agree.
        match self.staged.entry(key) {
            Entry::Occupied(mut entry) => {
                let version = self.next_version.fetch_add(1, Ordering::Relaxed);
                let previous = entry.insert(StagedCandidate { content, version });
                tracing::debug!(key = %key, version, superseded = previous.version, "Staged candidate superseded");
                version
            }
            Entry::Vacant(entry) => {
                let version = self.next_version.fetch_add(1, Ordering::Relaxed);
                entry.insert(StagedCandidate { content, version });
                tracing::debug!(key = %key, version, "Staged candidate");
                version
            }
        }
    }

    /// Move the staged candidate for `key` into the running cycle.
    pub fn claim(&self, key: HostKey) -> Option<StagedCandidate> {
        let (_, candidate) = self.staged.remove(&key)?;
        self.claimed.insert(key, candidate.clone());
        Some(candidate)
    }

    /// Promote the claimed candidate for `key` to active.
    ///
    /// Returns whether the active content changed. An unchanged candidate
    /// touches nothing on disk.
    pub fn commit(&self, key: HostKey) -> Result<bool, StoreError> {
        let candidate = self
            .claimed
            .get(&key)
            .map(|c| c.value().clone())
            .ok_or(StoreError::NotClaimed(key))?;

        let path = self.root.join(key.relative_path());
        let current = self.active.load_full();

        let changed = match &candidate.content {
            Some(content) if current.get(&key) == Some(content.as_ref()) => false,
            Some(content) => {
                write_atomic(&path, content.as_bytes()).map_err(|e| StoreError::io(&path, e))?;
                true
            }
            None if current.contains(&key) => {
                remove_if_exists(&path).map_err(|e| StoreError::io(&path, e))?;
                true
            }
            None => false,
        };

        if changed {
            let mut next = ConfigTree::clone(&current);
            next.set(key, candidate.content.clone());
            self.active.store(Arc::new(next));
        }
        self.claimed.remove(&key);

        let rejected = self.root.join(key.rejected_path());
        if let Err(e) = remove_if_exists(&rejected) {
            tracing::warn!(path = ?rejected, error = %e, "Failed to remove stale rejected config");
        }

        tracing::debug!(key = %key, version = candidate.version, changed, "Committed candidate");
        Ok(changed)
    }

    /// Discard the claimed candidate for `key`; active content is untouched.
    pub fn rollback(&self, key: HostKey) -> Option<StagedCandidate> {
        let (_, candidate) = self.claimed.remove(&key)?;
        tracing::debug!(key = %key, version = candidate.version, "Rolled back candidate");
        Some(candidate)
    }

    /// Keep a rejected candidate next to the active file for inspection.
    /// The `.err` suffix keeps it out of the include globs.
    pub fn write_rejected(&self, key: HostKey, content: &str) -> Result<(), StoreError> {
        let path = self.root.join(key.rejected_path());
        write_atomic(&path, content.as_bytes()).map_err(|e| StoreError::io(&path, e))
    }

    /// Move the active file of `key` to its `.err` path and drop it from the
    /// active tree. Used for files loaded at open that do not validate.
    pub fn quarantine(&self, key: HostKey) -> Result<(), StoreError> {
        let path = self.root.join(key.relative_path());
        let rejected = self.root.join(key.rejected_path());
        fs::rename(&path, &rejected).map_err(|e| StoreError::io(&path, e))?;

        let mut next = ConfigTree::clone(&self.active.load());
        next.set(key, None);
        self.active.store(Arc::new(next));

        tracing::warn!(key = %key, path = ?rejected, "Quarantined broken active config");
        Ok(())
    }

    /// The committed tree.
    pub fn active_tree(&self) -> Arc<ConfigTree> {
        self.active.load_full()
    }

    /// Active tree with every uncommitted candidate overlaid, newest last.
    pub fn snapshot_tree(&self) -> ConfigTree {
        let mut tree = ConfigTree::clone(&self.active.load());
        for candidate in self.claimed.iter() {
            tree.set(*candidate.key(), candidate.value().content.clone());
        }
        for candidate in self.staged.iter() {
            tree.set(*candidate.key(), candidate.value().content.clone());
        }
        tree
    }

    /// Active tree with only the claimed candidates of `keys` overlaid.
    pub fn snapshot_tree_with(&self, keys: &[HostKey]) -> ConfigTree {
        let mut tree = ConfigTree::clone(&self.active.load());
        for key in keys {
            if let Some(candidate) = self.claimed.get(key) {
                tree.set(*key, candidate.content.clone());
            }
        }
        tree
    }

    /// Content of the claimed candidate for `key`, if it is not a removal.
    pub fn claimed_content(&self, key: &HostKey) -> Option<Arc<str>> {
        self.claimed.get(key).and_then(|c| c.content.clone())
    }

    pub fn artifact(&self, key: HostKey) -> ConfigArtifact {
        let active = self.active.load().get(&key).map(Arc::<str>::from);
        let staged = self
            .staged
            .get(&key)
            .or_else(|| self.claimed.get(&key))
            .map(|c| c.value().clone());
        ConfigArtifact { key, active, staged }
    }
}

fn load_type_dir(root: &Path, host_type: HostType, tree: &mut ConfigTree) -> Result<(), StoreError> {
    let dir = root.join(host_type.dir_name());
    fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

    for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
        let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.ends_with(TEMP_SUFFIX) {
            tracing::debug!(path = ?path, "Removing interrupted write");
            let _ = fs::remove_file(&path);
            continue;
        }

        let Some(id) = name.strip_suffix(".conf").and_then(|stem| stem.parse::<u64>().ok()) else {
            continue;
        };
        let content = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        tree.insert(HostKey::new(host_type, id), content.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: u64) -> HostKey {
        HostKey::new(HostType::Proxy, id)
    }

    fn open(dir: &tempfile::TempDir) -> ConfigFileStore {
        ConfigFileStore::open(dir.path().join("nginx"), dir.path().join("work")).unwrap()
    }

    #[test]
    fn test_last_write_wins_before_claim() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);

        let x = store.stage(key(1), "X");
        let y = store.stage(key(1), "Y");
        assert!(y > x);

        let claimed = store.claim(key(1)).unwrap();
        assert_eq!(claimed.content.as_deref(), Some("Y"));
        assert!(store.commit(key(1)).unwrap());
        assert_eq!(store.active_tree().get(&key(1)), Some("Y"));
        assert_eq!(
            fs::read_to_string(store.root().join("proxy_host/1.conf")).unwrap(),
            "Y"
        );
    }

    #[test]
    fn test_stage_during_cycle_is_not_committed() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);

        store.stage(key(1), "old");
        store.claim(key(1)).unwrap();
        store.stage(key(1), "new");

        store.commit(key(1)).unwrap();
        assert_eq!(store.active_tree().get(&key(1)), Some("old"));
        assert_eq!(
            store.artifact(key(1)).staged.unwrap().content.as_deref(),
            Some("new")
        );
    }

    #[test]
    fn test_unchanged_commit_reports_no_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);

        store.stage(key(1), "same");
        store.claim(key(1));
        assert!(store.commit(key(1)).unwrap());

        store.stage(key(1), "same");
        store.claim(key(1));
        assert!(!store.commit(key(1)).unwrap());
    }

    #[test]
    fn test_removal_and_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);

        store.stage(key(1), "content");
        store.claim(key(1));
        store.commit(key(1)).unwrap();

        store.stage(key(1), "broken");
        store.claim(key(1));
        assert_eq!(store.rollback(key(1)).unwrap().content.as_deref(), Some("broken"));
        assert_eq!(store.active_tree().get(&key(1)), Some("content"));

        store.stage_removal(key(1));
        store.claim(key(1));
        assert!(store.commit(key(1)).unwrap());
        assert!(!store.snapshot_tree().contains(&key(1)));
        assert!(!store.root().join("proxy_host/1.conf").exists());
    }

    #[test]
    fn test_commit_without_claim_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.stage(key(1), "x");
        assert!(matches!(store.commit(key(1)), Err(StoreError::NotClaimed(_))));
    }

    #[test]
    fn test_snapshot_overlays_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);

        store.stage(key(1), "one");
        store.claim(key(1));
        store.stage(key(2), "two");

        let full = store.snapshot_tree();
        assert_eq!(full.len(), 2);

        let subset = store.snapshot_tree_with(&[key(1)]);
        assert_eq!(subset.get(&key(1)), Some("one"));
        assert!(!subset.contains(&key(2)));
        assert!(store.active_tree().is_empty());
    }

    #[test]
    fn test_reopen_loads_active_tree() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(&dir);
            store.stage(key(3), "persisted");
            store.claim(key(3));
            store.commit(key(3)).unwrap();
            store.write_rejected(key(4), "bad").unwrap();
        }
        fs::write(dir.path().join("nginx/proxy_host/.9.conf.abc.tmp"), "partial").unwrap();

        let store = open(&dir);
        let tree = store.active_tree();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&key(3)), Some("persisted"));
        assert!(!dir.path().join("nginx/proxy_host/.9.conf.abc.tmp").exists());
    }

    #[test]
    fn test_successful_commit_clears_rejected_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.write_rejected(key(1), "bad").unwrap();
        assert!(store.root().join("proxy_host/1.conf.err").exists());

        store.stage(key(1), "good");
        store.claim(key(1));
        store.commit(key(1)).unwrap();
        assert!(!store.root().join("proxy_host/1.conf.err").exists());
    }

    #[test]
    fn test_quarantine_moves_active_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nginx/proxy_host")).unwrap();
        fs::write(dir.path().join("nginx/proxy_host/5.conf"), "server {").unwrap();

        let store = open(&dir);
        assert!(store.active_tree().contains(&key(5)));

        store.quarantine(key(5)).unwrap();
        assert!(!store.active_tree().contains(&key(5)));
        assert!(!store.root().join("proxy_host/5.conf").exists());
        assert_eq!(
            fs::read_to_string(store.root().join("proxy_host/5.conf.err")).unwrap(),
            "server {"
        );
        assert!(store.quarantine(key(5)).is_err());
    }
}
