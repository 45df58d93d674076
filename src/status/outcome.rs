//! Per-host commit outcomes.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::host::HostKey;

/// Meta field set to whether the host's config is live.
pub const META_ONLINE: &str = "nginx_online";
/// Meta field holding the last diagnostic, or null.
pub const META_ERROR: &str = "nginx_err";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    /// The candidate was validated and committed.
    Active,
    /// The candidate was rejected; any earlier active content is kept.
    Errored,
}

impl CommitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitStatus::Active => "active",
            CommitStatus::Errored => "errored",
        }
    }
}

/// Result of one key's commit cycle, handed back to the caller for
/// persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub key: HostKey,
    pub status: CommitStatus,
    pub diagnostic: Option<String>,
    /// The committed candidate was a removal.
    #[serde(default)]
    pub removed: bool,
    /// Seconds since the Unix epoch.
    pub updated_at: u64,
}

impl CommitOutcome {
    pub fn active(key: HostKey, removed: bool) -> Self {
        Self {
            key,
            status: CommitStatus::Active,
            diagnostic: None,
            removed,
            updated_at: now_secs(),
        }
    }

    pub fn errored(key: HostKey, diagnostic: impl Into<String>) -> Self {
        Self {
            key,
            status: CommitStatus::Errored,
            diagnostic: Some(diagnostic.into()),
            removed: false,
            updated_at: now_secs(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CommitStatus::Active
    }

    /// A committed removal; the host no longer has a config.
    pub fn is_removal(&self) -> bool {
        self.is_active() && self.removed
    }

    /// Write the status fields the persistence layer stores in a host's meta.
    pub fn merge_into_meta(&self, meta: &mut Map<String, Value>) {
        meta.insert(META_ONLINE.to_string(), Value::Bool(self.is_active()));
        meta.insert(
            META_ERROR.to_string(),
            self.diagnostic.clone().map(Value::String).unwrap_or(Value::Null),
        );
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostType;
    use serde_json::json;

    #[test]
    fn test_merge_into_meta() {
        let key = HostKey::new(HostType::Redirection, 2);
        let mut meta = Map::new();
        meta.insert("letsencrypt_email".into(), json!("ops@example.com"));

        CommitOutcome::errored(key, "[emerg] unexpected \"{\"").merge_into_meta(&mut meta);
        assert_eq!(meta[META_ONLINE], json!(false));
        assert_eq!(meta[META_ERROR], json!("[emerg] unexpected \"{\""));

        CommitOutcome::active(key, false).merge_into_meta(&mut meta);
        assert_eq!(meta[META_ONLINE], json!(true));
        assert_eq!(meta[META_ERROR], Value::Null);
        assert_eq!(meta["letsencrypt_email"], json!("ops@example.com"));
    }

    #[test]
    fn test_serialized_shape() {
        let outcome = CommitOutcome::active(HostKey::new(HostType::Proxy, 1), true);
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], json!("active"));
        assert_eq!(value["key"]["type"], json!("proxy"));
        assert_eq!(value["removed"], json!(true));
        assert!(value["updated_at"].as_u64().unwrap() > 0);
    }
}
