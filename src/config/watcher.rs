//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file itself: editors and
//! config management usually replace the file by rename, which would leave a
//! file watch pointing at the old inode.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::SchedulerConfig;

/// Forwards scheduler settings whenever the config file changes and still
/// validates.
pub struct ConfigWatcher {
    path: PathBuf,
    current: SchedulerConfig,
    update_tx: mpsc::UnboundedSender<SchedulerConfig>,
}

impl ConfigWatcher {
    /// `current` is what the engine runs with now; identical settings are
    /// not forwarded again.
    pub fn new(path: &Path, current: SchedulerConfig) -> (Self, mpsc::UnboundedReceiver<SchedulerConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                current,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(OsString::from);
        let path = self.path.clone();
        let tx = self.update_tx;
        let last = Arc::new(Mutex::new(self.current));

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && touches(&event, file_name.as_deref());
                    if !relevant {
                        return;
                    }
                    match load_config(&path) {
                        Ok(config) => {
                            let Ok(mut last) = last.lock() else {
                                return;
                            };
                            if *last != config.scheduler {
                                tracing::info!(path = ?path, "Config file changed, applying scheduler settings");
                                *last = config.scheduler.clone();
                                let _ = tx.send(config.scheduler);
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current settings");
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

fn touches(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    event
        .paths
        .iter()
        .any(|p| p.file_name().is_some() && p.file_name() == file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind};

    #[test]
    fn test_only_events_for_the_config_file_count() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/host-sync/host-sync.toml"));
        assert!(touches(&event, Some(std::ffi::OsStr::new("host-sync.toml"))));
        assert!(!touches(&event, Some(std::ffi::OsStr::new("other.toml"))));

        let swap = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/host-sync/.host-sync.toml.swp"));
        assert!(!touches(&swap, Some(std::ffi::OsStr::new("host-sync.toml"))));
    }
}
