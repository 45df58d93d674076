//! Requests drained into one commit cycle.

use std::collections::BTreeMap;

use tokio::sync::oneshot;

use crate::error::EngineError;
use crate::host::HostKey;
use crate::status::CommitOutcome;

pub type CommitResponder = oneshot::Sender<Result<CommitOutcome, EngineError>>;
pub type FlushResponder = oneshot::Sender<Result<(), EngineError>>;

/// A caller waiting for the outcome of its staged candidate.
#[derive(Debug)]
pub struct CommitRequest {
    pub key: HostKey,
    /// Version returned by `stage`; informational, the newest staged
    /// candidate is what gets claimed.
    pub version: u64,
    pub respond_to: CommitResponder,
}

#[derive(Debug)]
pub enum SchedulerMessage {
    Commit(CommitRequest),
    /// Run a cycle even with nothing to commit.
    Flush(FlushResponder),
}

/// Deduplicated view of the drained messages.
#[derive(Debug, Default)]
pub struct Batch {
    /// Every caller of a key gets the outcome of the key's single candidate.
    pub waiters: BTreeMap<HostKey, Vec<CommitResponder>>,
    pub flushes: Vec<FlushResponder>,
    /// Highest version requested per key, for logging.
    pub versions: BTreeMap<HostKey, u64>,
    /// What each key's callers were told.
    pub answered: BTreeMap<HostKey, Result<CommitOutcome, EngineError>>,
}

impl Batch {
    pub fn push(&mut self, message: SchedulerMessage) {
        match message {
            SchedulerMessage::Commit(request) => {
                let version = self.versions.entry(request.key).or_default();
                *version = (*version).max(request.version);
                self.waiters.entry(request.key).or_default().push(request.respond_to);
            }
            SchedulerMessage::Flush(respond_to) => self.flushes.push(respond_to),
        }
    }

    pub fn keys(&self) -> Vec<HostKey> {
        self.waiters.keys().copied().collect()
    }

    pub fn request_count(&self) -> usize {
        self.waiters.values().map(Vec::len).sum()
    }

    /// Send `result` to every caller waiting on `key`.
    pub fn respond(&mut self, key: HostKey, result: Result<CommitOutcome, EngineError>) {
        for respond_to in self.waiters.remove(&key).unwrap_or_default() {
            // A caller that gave up waiting is not an error.
            let _ = respond_to.send(result.clone());
        }
        self.answered.insert(key, result);
    }

    /// Answer every remaining caller, commit or flush, with `error`.
    pub fn fail_all(&mut self, error: EngineError) {
        for key in self.keys() {
            self.respond(key, Err(error.clone()));
        }
        self.finish_flushes(Err(error));
    }

    pub fn finish_flushes(&mut self, result: Result<(), EngineError>) {
        for respond_to in self.flushes.drain(..) {
            let _ = respond_to.send(result.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostType;

    #[tokio::test]
    async fn test_dedupes_by_key_and_answers_every_caller() {
        let key = HostKey::new(HostType::Proxy, 1);
        let mut batch = Batch::default();
        let mut receivers = Vec::new();
        for version in [3, 7, 5] {
            let (tx, rx) = oneshot::channel();
            batch.push(SchedulerMessage::Commit(CommitRequest {
                key,
                version,
                respond_to: tx,
            }));
            receivers.push(rx);
        }

        assert_eq!(batch.keys(), vec![key]);
        assert_eq!(batch.request_count(), 3);
        assert_eq!(batch.versions[&key], 7);

        batch.respond(key, Ok(CommitOutcome::active(key, false)));
        for rx in receivers {
            assert!(rx.await.unwrap().unwrap().is_active());
        }
        assert!(batch.waiters.is_empty());
        assert!(matches!(batch.answered.get(&key), Some(Ok(o)) if o.is_active()));
    }

    #[tokio::test]
    async fn test_fail_all_reaches_flushes() {
        let mut batch = Batch::default();
        let (tx, rx) = oneshot::channel();
        batch.push(SchedulerMessage::Flush(tx));

        batch.fail_all(EngineError::Shutdown);
        assert!(matches!(rx.await.unwrap(), Err(EngineError::Shutdown)));
    }
}
