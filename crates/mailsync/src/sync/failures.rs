//! Failure history for messages that keep failing across runs
//!
//! A failed message normally holds sync back: full sync leaves a hole in
//! the checkpoint and the history walk keeps its cursor, so the next run
//! retries it. A message that fails on every run would hold sync back
//! forever. Each failure is recorded in the store, and once a message has
//! used up its attempts (or failed in a way no retry can fix) sync moves
//! past it.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, warn};

use crate::error::SyncError;
use crate::models::MessageId;
use crate::storage::MessageStore;

/// What to do with a message that just failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Hold progress so the next run tries again
    Retry,
    /// Count it as failed and move on
    GiveUp,
}

/// Per-run view of the stored failure history for one account
pub(crate) struct FailureLedger {
    store: Arc<dyn MessageStore>,
    account_id: String,
    max_attempts: u32,
    /// Failure counts as of the start of the run
    known: HashMap<MessageId, u32>,
}

impl FailureLedger {
    pub fn load(store: Arc<dyn MessageStore>, account_id: &str, max_attempts: u32) -> Self {
        let known = match store.message_failures(account_id) {
            Ok(known) => known,
            Err(e) => {
                warn!("Failed to load message failures for {}: {:#}", account_id, e);
                HashMap::new()
            }
        };
        Self {
            store,
            account_id: account_id.to_string(),
            max_attempts: max_attempts.max(1),
            known,
        }
    }

    /// Record a non-fatal failure of `id` and decide whether to retry it
    pub fn record(&self, id: &MessageId, err: &SyncError) -> Disposition {
        let attempts = match self
            .store
            .record_message_failure(&self.account_id, id, &err.to_string())
        {
            Ok(attempts) => attempts,
            Err(e) => {
                error!("Failed to record failure of message {}: {:#}", id, e);
                // Unrecorded, so fall back on what the run started with
                self.known.get(id).copied().unwrap_or(0) + 1
            }
        };

        if err.is_permanent() || attempts >= self.max_attempts {
            warn!(
                "Giving up on message {} after {} attempt(s): {}",
                id, attempts, err
            );
            Disposition::GiveUp
        } else {
            debug!(
                "Message {} failed attempt {} of {}",
                id, attempts, self.max_attempts
            );
            Disposition::Retry
        }
    }

    /// Forget the failure history of a message that synced
    pub fn succeeded(&self, id: &MessageId) {
        if !self.known.contains_key(id) {
            return;
        }
        if let Err(e) = self.store.clear_message_failure(&self.account_id, id) {
            warn!("Failed to clear failure history of {}: {:#}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryMailStore;

    fn network() -> SyncError {
        SyncError::Network("connection reset".to_string())
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let store = Arc::new(InMemoryMailStore::new());
        let id = MessageId::new("m1");

        for run in 1..=3 {
            let ledger = FailureLedger::load(store.clone(), "acct", 3);
            let expected = if run < 3 {
                Disposition::Retry
            } else {
                Disposition::GiveUp
            };
            assert_eq!(ledger.record(&id, &network()), expected, "run {run}");
        }
    }

    #[test]
    fn test_malformed_gives_up_at_once() {
        let store = Arc::new(InMemoryMailStore::new());
        let ledger = FailureLedger::load(store, "acct", 3);
        let err = SyncError::Malformed {
            message_id: "m1".to_string(),
            reason: "no payload".to_string(),
        };
        assert_eq!(
            ledger.record(&MessageId::new("m1"), &err),
            Disposition::GiveUp
        );
    }

    #[test]
    fn test_success_resets_history() {
        let store = Arc::new(InMemoryMailStore::new());
        let id = MessageId::new("m1");
        FailureLedger::load(store.clone(), "acct", 2).record(&id, &network());

        let ledger = FailureLedger::load(store.clone(), "acct", 2);
        ledger.succeeded(&id);
        assert!(store.message_failures("acct").unwrap().is_empty());

        let ledger = FailureLedger::load(store, "acct", 2);
        assert_eq!(ledger.record(&id, &network()), Disposition::Retry);
    }
}
