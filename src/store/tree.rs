//! Immutable view of a configuration tree.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::host::{HostKey, HostType};

/// Name of the entry file written at the root of a materialized tree.
pub const ROOT_CONFIG: &str = "nginx.conf";

/// Host configs keyed by `HostKey`, in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTree {
    entries: BTreeMap<HostKey, Arc<str>>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &HostKey) -> Option<&str> {
        self.entries.get(key).map(|c| c.as_ref())
    }

    pub fn contains(&self, key: &HostKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &HostKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HostKey, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_ref()))
    }

    pub fn insert(&mut self, key: HostKey, content: Arc<str>) {
        self.entries.insert(key, content);
    }

    /// Overlay a candidate: `Some` replaces the entry, `None` removes it.
    pub fn set(&mut self, key: HostKey, content: Option<Arc<str>>) {
        match content {
            Some(content) => {
                self.entries.insert(key, content);
            }
            None => {
                self.entries.remove(&key);
            }
        }
    }

    /// Names declared by `server_name` directives in an entry.
    pub fn server_names(&self, key: &HostKey) -> Vec<String> {
        let Some(content) = self.get(key) else {
            return Vec::new();
        };

        content
            .lines()
            .map(str::trim_start)
            .filter_map(|line| line.strip_prefix("server_name"))
            .filter(|rest| rest.starts_with(char::is_whitespace))
            .flat_map(|rest| rest.split(';').next().unwrap_or_default().split_whitespace())
            .map(str::to_string)
            .collect()
    }

    /// Write the tree into `dir` with a root `nginx.conf` that includes every
    /// host file, ready for the checker.
    pub fn materialize(&self, dir: &Path) -> io::Result<()> {
        for host_type in HostType::ALL {
            fs::create_dir_all(dir.join(host_type.dir_name()))?;
        }
        for (key, content) in &self.entries {
            fs::write(dir.join(key.relative_path()), content.as_bytes())?;
        }
        fs::write(dir.join(ROOT_CONFIG), root_config(dir))
    }
}

fn root_config(dir: &Path) -> String {
    let root = dir.display();
    format!(
        "# Generated for configuration checks only.\n\
         pid {root}/nginx.pid;\n\
         error_log stderr;\n\
         \n\
         events {{\n  worker_connections 1024;\n}}\n\
         \n\
         http {{\n  include {root}/proxy_host/*.conf;\n  include {root}/redirection_host/*.conf;\n  include {root}/dead_host/*.conf;\n}}\n\
         \n\
         stream {{\n  include {root}/stream/*.conf;\n}}\n"
    )
}
