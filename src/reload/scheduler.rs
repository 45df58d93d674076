//! The single commit worker.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::schema::SchedulerConfig;
use crate::error::EngineError;
use crate::host::HostKey;
use crate::observability::metrics;
use crate::reload::batch::{Batch, CommitRequest, SchedulerMessage};
use crate::reload::reloader::{ReloadError, Reloader};
use crate::status::{CommitOutcome, StatusReporter};
use crate::store::{ConfigFileStore, StagedCandidate, StoreError};
use crate::validate::ValidationRunner;

/// Cheap, cloneable entry point into the worker.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerMessage>,
    reload_pending: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// Queue the staged candidate of `key` and wait for its cycle.
    pub async fn submit(&self, key: HostKey, version: u64) -> Result<CommitOutcome, EngineError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(SchedulerMessage::Commit(CommitRequest {
                key,
                version,
                respond_to,
            }))
            .map_err(|_| EngineError::Shutdown)?;
        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    /// Force a cycle, retrying a reload that failed earlier.
    pub async fn flush(&self) -> Result<(), EngineError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(SchedulerMessage::Flush(respond_to))
            .map_err(|_| EngineError::Shutdown)?;
        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    /// Whether the server is running an older tree than the active one.
    pub fn reload_pending(&self) -> bool {
        self.reload_pending.load(Ordering::Relaxed)
    }
}

type Answers = BTreeMap<HostKey, Result<CommitOutcome, EngineError>>;

/// Serializes validate → commit → reload across all callers.
///
/// Exactly one cycle runs at a time. Requests that arrive while a cycle runs
/// wait in the channel for the next one. Before the first cycle the worker
/// checks the tree it loaded from disk and quarantines broken files.
pub struct ReloadScheduler {
    store: Arc<ConfigFileStore>,
    runner: Arc<ValidationRunner>,
    reloader: Arc<dyn Reloader>,
    status: StatusReporter,
    settings: Arc<ArcSwap<SchedulerConfig>>,
    reload_pending: Arc<AtomicBool>,
    /// Answers of the last cycle, for requests whose content it claimed.
    previous: Answers,
}

impl ReloadScheduler {
    pub fn new(
        store: Arc<ConfigFileStore>,
        runner: Arc<ValidationRunner>,
        reloader: Arc<dyn Reloader>,
        status: StatusReporter,
        settings: Arc<ArcSwap<SchedulerConfig>>,
    ) -> Self {
        Self {
            store,
            runner,
            reloader,
            status,
            settings,
            reload_pending: Arc::new(AtomicBool::new(false)),
            previous: Answers::new(),
        }
    }

    /// Start the worker. It stops on `shutdown` or once every handle is
    /// dropped. Must be called from within a Tokio runtime.
    pub fn spawn(self, shutdown: Option<broadcast::Receiver<()>>) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SchedulerHandle {
            tx,
            reload_pending: self.reload_pending.clone(),
        };
        let task = tokio::spawn(self.run(rx, shutdown));
        (handle, task)
    }

    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<SchedulerMessage>,
        mut shutdown: Option<broadcast::Receiver<()>>,
    ) {
        tracing::info!(reloader = self.reloader.name(), "Reload scheduler started");
        self.repair_active().await;

        loop {
            let first = tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            let mut batch = Batch::default();
            batch.push(first);

            let debounce = Duration::from_millis(self.settings.load().debounce_ms);
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    batch.fail_all(EngineError::Shutdown);
                    break;
                }
            }

            while let Ok(message) = rx.try_recv() {
                batch.push(message);
            }

            let span = tracing::info_span!(
                "commit_cycle",
                cycle = %Uuid::new_v4(),
                keys = batch.waiters.len(),
                requests = batch.request_count()
            );
            self.previous = self.run_cycle(batch).instrument(span).await;
        }

        rx.close();
        while let Ok(message) = rx.try_recv() {
            let mut batch = Batch::default();
            batch.push(message);
            batch.fail_all(EngineError::Shutdown);
        }
        tracing::info!("Reload scheduler stopped");
    }

    /// Quarantine loaded files that keep the active tree from validating.
    async fn repair_active(&self) {
        let tree = self.store.active_tree();
        if tree.is_empty() {
            return;
        }

        let offenders = match self.runner.offenders(&tree).await {
            Ok(offenders) => offenders,
            Err(e) => {
                tracing::error!(error = %e, hosts = tree.len(), "Could not check the loaded tree");
                return;
            }
        };
        if offenders.is_empty() {
            return;
        }

        for (key, diagnostic) in offenders {
            if let Err(e) = self.store.quarantine(key) {
                tracing::error!(key = %key, error = %e, "Failed to quarantine broken config");
                continue;
            }
            let outcome = CommitOutcome::errored(key, diagnostic);
            metrics::record_commit(outcome.status.as_str());
            self.status.record(outcome);
        }
        if let Err(e) = self.status.save_to_file() {
            tracing::warn!(error = %e, "Failed to save host status");
        }
        metrics::record_active_hosts(self.store.active_tree().len());
    }

    /// Run one cycle and return what every key's callers were told.
    async fn run_cycle(&self, mut batch: Batch) -> Answers {
        let started = Instant::now();

        let mut claimed: HashMap<HostKey, StagedCandidate> = HashMap::new();
        for key in batch.keys() {
            match self.store.claim(key) {
                Some(candidate) => {
                    tracing::debug!(
                        key = %key,
                        version = candidate.version,
                        requested = batch.versions.get(&key).copied().unwrap_or_default(),
                        removal = candidate.is_removal(),
                        "Claimed candidate"
                    );
                    claimed.insert(key, candidate);
                }
                None => {
                    // The last cycle claimed this content; repeat its answer.
                    let result = self
                        .previous
                        .get(&key)
                        .cloned()
                        .or_else(|| self.status.get(&key).map(Ok))
                        .unwrap_or_else(|| Err(EngineError::Store(StoreError::NotClaimed(key))));
                    batch.respond(key, result);
                }
            }
        }

        let mut keys: Vec<HostKey> = claimed.keys().copied().collect();
        keys.sort();

        let isolation = match self.runner.isolate(&self.store, &keys).await {
            Ok(isolation) => isolation,
            Err(e) => {
                tracing::error!(error = %e, keys = keys.len(), "Checker failed, rolling back cycle");
                for key in &keys {
                    self.store.rollback(*key);
                }
                batch.fail_all(EngineError::Checker(e));
                self.finish(started);
                return batch.answered;
            }
        };

        for (key, diagnostic) in &isolation.rejected {
            if let Some(content) = self.store.claimed_content(key) {
                if let Err(e) = self.store.write_rejected(*key, &content) {
                    tracing::warn!(key = %key, error = %e, "Failed to keep rejected config");
                }
            }
            self.store.rollback(*key);

            let outcome = CommitOutcome::errored(*key, diagnostic.clone());
            self.status.record(outcome.clone());
            metrics::record_commit(outcome.status.as_str());
            batch.respond(*key, Ok(outcome));
        }

        let mut changed = 0usize;
        let mut committed = Vec::new();
        for key in &isolation.accepted {
            let removed = claimed.get(key).map(StagedCandidate::is_removal).unwrap_or(false);
            match self.store.commit(*key) {
                Ok(did_change) => {
                    changed += usize::from(did_change);
                    let outcome = CommitOutcome::active(*key, removed);
                    self.status.record(outcome.clone());
                    metrics::record_commit(outcome.status.as_str());
                    committed.push((*key, outcome));
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Commit failed");
                    self.store.rollback(*key);
                    batch.respond(*key, Err(EngineError::Store(e)));
                }
            }
        }

        let reload = if changed > 0 || self.reload_pending.load(Ordering::Relaxed) {
            Some(self.reload().await)
        } else {
            tracing::debug!("Active tree unchanged, skipping reload");
            None
        };

        tracing::info!(
            accepted = isolation.accepted.len(),
            rejected = isolation.rejected.len(),
            changed,
            reloaded = matches!(reload, Some(Ok(()))),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Commit cycle complete"
        );
        self.finish(started);

        match reload {
            Some(Err(e)) => {
                for (key, _) in committed {
                    batch.respond(key, Err(EngineError::Reload(e.clone())));
                }
                batch.finish_flushes(Err(EngineError::Reload(e)));
            }
            _ => {
                for (key, outcome) in committed {
                    batch.respond(key, Ok(outcome));
                }
                batch.finish_flushes(Ok(()));
            }
        }
        batch.answered
    }

    async fn reload(&self) -> Result<(), ReloadError> {
        match self.reloader.reload().await {
            Ok(()) => {
                self.reload_pending.store(false, Ordering::Relaxed);
                metrics::record_reload(true);
                tracing::info!(reloader = self.reloader.name(), "Server reloaded");
                Ok(())
            }
            Err(e) => {
                self.reload_pending.store(true, Ordering::Relaxed);
                metrics::record_reload(false);
                tracing::error!(reloader = self.reloader.name(), error = %e, "Reload failed, will retry next cycle");
                Err(e)
            }
        }
    }

    /// Persist outcomes and record cycle metrics before callers are answered.
    fn finish(&self, started: Instant) {
        if let Err(e) = self.status.save_to_file() {
            tracing::warn!(error = %e, "Failed to save host status");
        }
        metrics::record_cycle(started.elapsed());
        metrics::record_active_hosts(self.store.active_tree().len());
    }
}

async fn wait_for_shutdown(shutdown: &mut Option<broadcast::Receiver<()>>) {
    match shutdown {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostType;
    use crate::reload::reloader::NoopReloader;
    use crate::validate::{CheckReport, CheckerError, ConfigChecker, SyntaxChecker};
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    /// Checker that cannot run, after a delay.
    struct UnavailableChecker;

    #[async_trait::async_trait]
    impl ConfigChecker for UnavailableChecker {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        async fn check(&self, _tree_dir: &Path) -> Result<CheckReport, CheckerError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(CheckerError::Task("checker binary missing".into()))
        }
    }

    #[derive(Default)]
    struct CountingReloader {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Reloader for CountingReloader {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn reload(&self) -> Result<(), ReloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(ReloadError {
                    diagnostic: "signal failed".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn scheduler(dir: &tempfile::TempDir, reloader: Arc<dyn Reloader>) -> (Arc<ConfigFileStore>, SchedulerHandle) {
        scheduler_with(dir, Arc::new(SyntaxChecker), reloader)
    }

    fn scheduler_with(
        dir: &tempfile::TempDir,
        checker: Arc<dyn ConfigChecker>,
        reloader: Arc<dyn Reloader>,
    ) -> (Arc<ConfigFileStore>, SchedulerHandle) {
        let store = Arc::new(ConfigFileStore::open(dir.path().join("nginx"), dir.path().join("work")).unwrap());
        let runner = Arc::new(ValidationRunner::new(checker, store.work_dir()));
        let settings = Arc::new(ArcSwap::from_pointee(SchedulerConfig {
            debounce_ms: 10,
            ..SchedulerConfig::default()
        }));
        let (handle, _) = ReloadScheduler::new(store.clone(), runner, reloader, StatusReporter::new(None), settings)
            .spawn(None);
        (store, handle)
    }

    fn key(id: u64) -> HostKey {
        HostKey::new(HostType::Proxy, id)
    }

    #[tokio::test]
    async fn test_commit_and_skip_unchanged_reload() {
        let dir = tempfile::tempdir().unwrap();
        let reloader = Arc::new(CountingReloader::default());
        let (store, handle) = scheduler(&dir, reloader.clone());

        let version = store.stage(key(1), "server {\n}\n");
        let outcome = handle.submit(key(1), version).await.unwrap();
        assert!(outcome.is_active());
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 1);

        let version = store.stage(key(1), "server {\n}\n");
        handle.submit(key(1), version).await.unwrap();
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reload_failure_is_retried_by_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let reloader = Arc::new(CountingReloader::default());
        reloader.fail.store(true, Ordering::SeqCst);
        let (store, handle) = scheduler(&dir, reloader.clone());

        let version = store.stage(key(1), "server {\n}\n");
        let err = handle.submit(key(1), version).await.unwrap_err();
        assert!(matches!(err, EngineError::Reload(_)));
        assert!(handle.reload_pending());
        assert!(store.active_tree().contains(&key(1)));

        reloader.fail.store(false, Ordering::SeqCst);
        handle.flush().await.unwrap();
        assert!(!handle.reload_pending());
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_flush_without_pending_reload_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, handle) = scheduler(&dir, Arc::new(NoopReloader));
        handle.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_late_caller_gets_the_answer_of_the_cycle_that_took_its_content() {
        let dir = tempfile::tempdir().unwrap();
        let reloader = Arc::new(CountingReloader::default());
        let (store, handle) = scheduler_with(&dir, Arc::new(UnavailableChecker), reloader.clone());

        let version = store.stage(key(1), "server {\n}\n");
        let (first, second) = tokio::join!(handle.submit(key(1), version), async {
            // Arrives while the first cycle is inside the checker.
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.submit(key(1), version).await
        });

        assert!(matches!(first, Err(EngineError::Checker(_))));
        assert!(matches!(second, Err(EngineError::Checker(_))));
        assert!(store.active_tree().is_empty());
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_without_staged_content_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (store, handle) = scheduler(&dir, Arc::new(NoopReloader));

        let err = handle.submit(key(4), 1).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::NotClaimed(k)) if k == key(4)));
        assert!(!store.active_tree().contains(&key(4)));
    }

    #[tokio::test]
    async fn test_shutdown_answers_waiting_callers() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigFileStore::open(dir.path().join("nginx"), dir.path().join("work")).unwrap());
        let runner = Arc::new(ValidationRunner::new(Arc::new(SyntaxChecker), store.work_dir()));
        let settings = Arc::new(ArcSwap::from_pointee(SchedulerConfig {
            debounce_ms: 60_000,
            ..SchedulerConfig::default()
        }));
        let (tx, _) = broadcast::channel(1);
        let (handle, task) = ReloadScheduler::new(
            store.clone(),
            runner,
            Arc::new(NoopReloader),
            StatusReporter::new(None),
            settings,
        )
        .spawn(Some(tx.subscribe()));

        let version = store.stage(key(1), "server {\n}\n");
        let pending = tokio::spawn({
            let handle = handle.clone();
            async move { handle.submit(key(1), version).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();

        assert!(matches!(pending.await.unwrap(), Err(EngineError::Shutdown)));
        task.await.unwrap();
        assert!(handle.submit(key(1), version).await.is_err());
    }
}
