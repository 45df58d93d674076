//! Engine facade.
//!
//! `Engine` is what the CRUD layer talks to: it renders a host, stages the
//! result and waits for the commit cycle that decides it. Renders run on the
//! caller's task; everything that touches the active tree goes through the
//! scheduler's single worker.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures_util::future::{join, join_all};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::config::schema::{CheckerKind, EngineConfig, ReloaderKind, SchedulerConfig};
use crate::error::EngineError;
use crate::host::{CertificateResolver, FileCertificateResolver, HostKey, HostRecord, ResolvedCertificate};
use crate::reload::{CommandReloader, NoopReloader, ReloadScheduler, Reloader, SchedulerHandle};
use crate::render::{RenderedConfig, Renderer, TemplateError};
use crate::status::reporter::STATUS_FILE;
use crate::status::{CommitOutcome, StatusReporter};
use crate::store::{ConfigArtifact, ConfigFileStore, ConfigTree};
use crate::validate::{
    CheckReport, CheckerError, CommandChecker, ConfigChecker, RunnerError, SyntaxChecker, ValidationRunner,
};

/// Answer to a domain collision query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostnameCheck {
    pub hostname: String,
    pub is_taken: bool,
    /// First active host, in key order, that serves the name.
    pub taken_by: Option<HostKey>,
}

pub struct Engine {
    renderer: Renderer,
    certificates: Arc<dyn CertificateResolver>,
    store: Arc<ConfigFileStore>,
    runner: Arc<ValidationRunner>,
    status: StatusReporter,
    scheduler: SchedulerHandle,
    settings: Arc<ArcSwap<SchedulerConfig>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.store.root())
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine over the tree at `root` with the builtin checker, no reloads
    /// and no certificates. Override with the builder methods.
    pub fn builder(root: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> EngineBuilder {
        EngineBuilder {
            root: root.into(),
            work_dir: work_dir.into(),
            checker: Arc::new(SyntaxChecker),
            reloader: Arc::new(NoopReloader),
            certificates: Arc::new(|_: u64| None::<ResolvedCertificate>),
            scheduler: SchedulerConfig::default(),
            shutdown: None,
            persist_status: false,
        }
    }

    /// Engine wired from a loaded configuration file.
    pub fn from_config(
        config: &EngineConfig,
        shutdown: Option<broadcast::Receiver<()>>,
    ) -> Result<Self, EngineError> {
        let checker: Arc<dyn ConfigChecker> = match config.checker.kind {
            CheckerKind::Builtin => Arc::new(SyntaxChecker),
            CheckerKind::Command => Arc::new(CommandChecker::new(
                config.checker.command.clone(),
                config.scheduler.check_timeout(),
            )),
        };
        let reloader: Arc<dyn Reloader> = match config.reloader.kind {
            ReloaderKind::Command => Arc::new(CommandReloader::new(
                config.reloader.command.clone(),
                config.scheduler.reload_timeout(),
            )),
            ReloaderKind::Noop => Arc::new(NoopReloader),
        };
        let certificates = FileCertificateResolver::new(
            &config.certificates.letsencrypt_dir,
            &config.certificates.custom_dir,
        );

        let mut builder = Engine::builder(&config.store.root, &config.store.work_dir)
            .checker(checker)
            .reloader(reloader)
            .certificates(Arc::new(certificates))
            .scheduler(config.scheduler.clone())
            .persist_status(true);
        if let Some(shutdown) = shutdown {
            builder = builder.shutdown(shutdown);
        }
        builder.build()
    }

    /// Render `host`, stage it and wait for its commit cycle.
    ///
    /// A disabled host has its config removed instead. A validation failure
    /// is an `Errored` outcome, not an error.
    pub async fn apply(&self, host: &HostRecord) -> Result<CommitOutcome, EngineError> {
        let key = host.key();
        if !host.enabled {
            tracing::debug!(key = %key, "Host disabled, removing its config");
            return self.remove(key).await;
        }

        let rendered = self.render(host)?;
        let version = self.store.stage(key, rendered.content);
        self.scheduler.submit(key, version).await
    }

    /// Stage the removal of `key` and wait for its commit cycle.
    pub async fn remove(&self, key: HostKey) -> Result<CommitOutcome, EngineError> {
        let version = self.store.stage_removal(key);
        self.scheduler.submit(key, version).await
    }

    /// Last outcome recorded for `key`.
    pub fn get_status(&self, key: &HostKey) -> Option<CommitOutcome> {
        self.status.get(key)
    }

    /// Apply a complete snapshot of host records concurrently. Active hosts
    /// missing from the snapshot are removed.
    pub async fn sync_all(&self, hosts: &[HostRecord]) -> Vec<(HostKey, Result<CommitOutcome, EngineError>)> {
        let wanted: HashSet<HostKey> = hosts.iter().map(HostRecord::key).collect();
        let stale: Vec<HostKey> = self
            .store
            .active_tree()
            .keys()
            .filter(|key| !wanted.contains(key))
            .copied()
            .collect();

        tracing::info!(hosts = hosts.len(), stale = stale.len(), "Synchronizing all hosts");

        let applies = hosts.iter().map(|host| async move { (host.key(), self.apply(host).await) });
        let removals = stale.into_iter().map(|key| async move { (key, self.remove(key).await) });

        let (mut results, removed) = join(join_all(applies), join_all(removals)).await;
        results.extend(removed);
        results
    }

    /// Whether an active HTTP host other than `ignore` serves `hostname`.
    pub fn is_hostname_taken(&self, hostname: &str, ignore: Option<HostKey>) -> HostnameCheck {
        let tree = self.store.active_tree();
        let taken_by = tree
            .keys()
            .filter(|key| key.host_type.is_http() && Some(**key) != ignore)
            .find(|key| {
                tree.server_names(key)
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(hostname))
            })
            .copied();

        HostnameCheck {
            hostname: hostname.to_string(),
            is_taken: taken_by.is_some(),
            taken_by,
        }
    }

    /// Validate the active tree as it is on disk.
    pub async fn check_active(&self) -> Result<CheckReport, CheckerError> {
        match self.runner.validate(&self.store.active_tree()).await {
            Ok(()) => Ok(CheckReport::Passed),
            Err(RunnerError::Invalid(e)) => Ok(CheckReport::Failed {
                diagnostic: e.diagnostic,
            }),
            Err(RunnerError::Checker(e)) => Err(e),
        }
    }

    /// Run a cycle with nothing to commit, retrying a failed reload.
    pub async fn flush(&self) -> Result<(), EngineError> {
        self.scheduler.flush().await
    }

    /// Render `host` without staging it. Certificates are resolved the same
    /// way `apply` resolves them.
    pub fn render(&self, host: &HostRecord) -> Result<RenderedConfig, TemplateError> {
        let key = host.key();
        let certificate = host.certificate_id.and_then(|id| {
            let resolved = self.certificates.resolve(id);
            if resolved.is_none() {
                tracing::warn!(key = %key, certificate_id = id, "Certificate not found, rendering without TLS");
            }
            resolved
        });
        self.renderer.render(host, certificate.as_ref())
    }

    pub fn active_tree(&self) -> Arc<ConfigTree> {
        self.store.active_tree()
    }

    pub fn artifact(&self, key: HostKey) -> ConfigArtifact {
        self.store.artifact(key)
    }

    pub fn statuses(&self) -> Vec<CommitOutcome> {
        self.status.all()
    }

    pub fn status_summary(&self) -> (usize, usize) {
        self.status.summary()
    }

    pub fn reload_pending(&self) -> bool {
        self.scheduler.reload_pending()
    }

    /// Apply new scheduler settings; the next cycle uses the new debounce
    /// window.
    pub fn update_scheduler(&self, settings: SchedulerConfig) {
        tracing::info!(debounce_ms = settings.debounce_ms, "Scheduler settings updated");
        self.settings.store(Arc::new(settings));
    }

    /// Wait for the commit worker to exit after shutdown was triggered.
    pub async fn join(&self) {
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Commit worker panicked");
            }
        }
    }
}

/// Assembles an `Engine`. See `Engine::builder`.
pub struct EngineBuilder {
    root: PathBuf,
    work_dir: PathBuf,
    checker: Arc<dyn ConfigChecker>,
    reloader: Arc<dyn Reloader>,
    certificates: Arc<dyn CertificateResolver>,
    scheduler: SchedulerConfig,
    shutdown: Option<broadcast::Receiver<()>>,
    persist_status: bool,
}

impl EngineBuilder {
    pub fn checker(mut self, checker: Arc<dyn ConfigChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn reloader(mut self, reloader: Arc<dyn Reloader>) -> Self {
        self.reloader = reloader;
        self
    }

    pub fn certificates(mut self, certificates: Arc<dyn CertificateResolver>) -> Self {
        self.certificates = certificates;
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Stop the commit worker when this fires.
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Keep host outcomes in a JSON file under the store root.
    pub fn persist_status(mut self, persist: bool) -> Self {
        self.persist_status = persist;
        self
    }

    /// Open the store and start the commit worker. Must be called from within
    /// a Tokio runtime.
    pub fn build(self) -> Result<Engine, EngineError> {
        let renderer = Renderer::new()?;
        let store = Arc::new(ConfigFileStore::open(self.root, self.work_dir)?);
        let runner = Arc::new(ValidationRunner::new(self.checker, store.work_dir()));

        let status = if self.persist_status {
            let path = store.root().join(STATUS_FILE);
            StatusReporter::load_from_file(&path).unwrap_or_else(|e| {
                tracing::warn!(path = ?path, error = %e, "Ignoring unreadable host status file");
                StatusReporter::new(Some(path.clone()))
            })
        } else {
            StatusReporter::new(None)
        };

        let settings = Arc::new(ArcSwap::from_pointee(self.scheduler));
        let (scheduler, worker) = ReloadScheduler::new(
            store.clone(),
            runner.clone(),
            self.reloader,
            status.clone(),
            settings.clone(),
        )
        .spawn(self.shutdown);

        tracing::info!(
            root = ?store.root(),
            checker = ?runner,
            active_hosts = store.active_tree().len(),
            "Engine ready"
        );

        Ok(Engine {
            renderer,
            certificates: self.certificates,
            store,
            runner,
            status,
            scheduler,
            settings,
            worker: Mutex::new(Some(worker)),
        })
    }
}
