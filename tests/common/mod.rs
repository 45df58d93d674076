//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use host_sync::config::SchedulerConfig;
use host_sync::reload::{ReloadError, Reloader};
use host_sync::validate::{CheckReport, CheckerError, ConfigChecker, SyntaxChecker};
use host_sync::{Engine, HostRecord};

/// Reloader that counts calls and fails on demand.
#[derive(Default)]
pub struct CountingReloader {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl CountingReloader {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Reloader for CountingReloader {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn reload(&self) -> Result<(), ReloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(ReloadError {
                diagnostic: "nginx: [error] invalid PID number \"\"".into(),
            })
        } else {
            Ok(())
        }
    }
}

/// Builtin syntax checks with a delay and a run counter.
pub struct SlowChecker {
    delay: Duration,
    runs: AtomicUsize,
}

impl SlowChecker {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigChecker for SlowChecker {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn check(&self, tree_dir: &Path) -> Result<CheckReport, CheckerError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        SyntaxChecker.check(tree_dir).await
    }
}

/// Checker that can never run, like a missing nginx binary.
pub struct BrokenChecker;

#[async_trait]
impl ConfigChecker for BrokenChecker {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn check(&self, _tree_dir: &Path) -> Result<CheckReport, CheckerError> {
        Err(CheckerError::Task("nginx binary not found".into()))
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub engine: Engine,
    pub reloader: Arc<CountingReloader>,
}

impl Harness {
    pub fn root(&self) -> std::path::PathBuf {
        self.dir.path().join("nginx")
    }
}

/// Engine with the builtin checker and a short debounce window.
pub fn harness() -> Harness {
    harness_with(Arc::new(SyntaxChecker), 20)
}

pub fn harness_with(checker: Arc<dyn ConfigChecker>, debounce_ms: u64) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let reloader = Arc::new(CountingReloader::default());
    let engine = open_engine(&dir, checker, reloader.clone(), debounce_ms);
    Harness { dir, engine, reloader }
}

pub fn open_engine(
    dir: &TempDir,
    checker: Arc<dyn ConfigChecker>,
    reloader: Arc<CountingReloader>,
    debounce_ms: u64,
) -> Engine {
    Engine::builder(dir.path().join("nginx"), dir.path().join("work"))
        .checker(checker)
        .reloader(reloader)
        .scheduler(SchedulerConfig {
            debounce_ms,
            ..SchedulerConfig::default()
        })
        .persist_status(true)
        .build()
        .unwrap()
}

pub fn proxy(id: u64, domain: &str) -> HostRecord {
    serde_json::from_value(json!({
        "id": id,
        "type": "proxy",
        "domain_names": [domain],
        "forward_scheme": "http",
        "forward_host": "10.0.0.2",
        "forward_port": 8080,
        "advanced_config": "",
    }))
    .unwrap()
}

pub fn redirection(id: u64, domain: &str, advanced_config: &str) -> HostRecord {
    serde_json::from_value(json!({
        "id": id,
        "type": "redirection",
        "domain_names": [domain],
        "forward_domain_name": "target.example",
        "advanced_config": advanced_config,
    }))
    .unwrap()
}

pub fn dead(id: u64, domain: &str) -> HostRecord {
    serde_json::from_value(json!({
        "id": id,
        "type": "dead",
        "domain_names": [domain],
    }))
    .unwrap()
}

pub fn stream(id: u64, incoming_port: u16) -> HostRecord {
    serde_json::from_value(json!({
        "id": id,
        "type": "stream",
        "incoming_port": incoming_port,
        "forwarding_host": "10.0.0.9",
        "forwarding_port": 22,
    }))
    .unwrap()
}

pub fn with_advanced(mut host: HostRecord, advanced_config: &str) -> HostRecord {
    host.advanced_config = advanced_config.to_string();
    host
}
