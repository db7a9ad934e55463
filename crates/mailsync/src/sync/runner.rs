//! Scheduling around the engine: status bookkeeping, cooldowns, and
//! repair of runs that died mid-sync

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};

use chrono::Utc;

use super::{SyncEngine, SyncStats, is_due};
use crate::error::SyncError;
use crate::models::{SyncStateUpdate, SyncStatus};
use crate::storage::SyncStateStore;

/// Outcome of one account's run
pub type AccountRun = (String, Result<SyncStats, SyncError>);

/// Drives [`SyncEngine`] and records `sync_status` around each run
pub struct SyncRunner {
    engine: Arc<SyncEngine>,
}

impl SyncRunner {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    fn states(&self) -> &dyn SyncStateStore {
        self.engine.states().as_ref()
    }

    /// Sync one account, marking it in progress for the duration
    pub fn run(&self, account_id: &str) -> Result<SyncStats, SyncError> {
        if self.states().get_sync_state(account_id)?.is_none() {
            return Err(SyncError::NotLinked {
                account_id: account_id.to_string(),
            });
        }
        self.set_status(account_id, SyncStatus::InProgress);

        let result = self.engine.sync(account_id);
        let status = match &result {
            Ok(_) => SyncStatus::Completed,
            Err(e) if e.is_credential_error() => SyncStatus::Inactive,
            Err(e) => SyncStatus::failed(e.to_string()),
        };
        self.set_status(account_id, status);
        result
    }

    /// Sync every active account whose cooldown has elapsed
    pub fn run_due(&self) -> Result<Vec<AccountRun>> {
        let cooldown = Duration::from_secs(self.engine.config().cooldown_secs);
        let now = Utc::now();
        let due: Vec<String> = self
            .states()
            .list_sync_states()?
            .into_iter()
            .filter(|s| is_due(s, cooldown, now))
            .map(|s| s.account_id)
            .collect();

        if !due.is_empty() {
            info!("{} account(s) due for sync", due.len());
        }
        Ok(due
            .into_iter()
            .map(|account_id| {
                let result = self.run(&account_id);
                (account_id, result)
            })
            .collect())
    }

    /// Pick up accounts left `in_progress` by a previous process
    pub fn resume_stale(&self) -> Result<Vec<AccountRun>> {
        let stale: Vec<_> = self
            .states()
            .list_sync_states()?
            .into_iter()
            .filter(|s| s.sync_status.is_in_progress())
            .collect();

        let mut runs = Vec::new();
        for state in stale {
            let account_id = state.account_id.clone();
            if !state.is_active {
                info!("Stale sync for inactive account {}, marking inactive", account_id);
                self.set_status(&account_id, SyncStatus::Inactive);
                continue;
            }

            if state.full_sync_checkpoint.is_none() && !state.has_cursor() {
                match self.engine.recovery().recover_checkpoint(&account_id) {
                    Ok(Some(checkpoint)) => {
                        warn!(
                            "Interrupted first sync of {}, resuming below {}",
                            account_id, checkpoint
                        );
                        let update = SyncStateUpdate::new().checkpoint(checkpoint);
                        self.states().update_sync_state(&account_id, &update)?;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Could not recover checkpoint for {}: {}", account_id, e),
                }
            }

            info!("Resuming stale sync for {}", account_id);
            let result = self.run(&account_id);
            runs.push((account_id, result));
        }
        Ok(runs)
    }

    fn set_status(&self, account_id: &str, status: SyncStatus) {
        let update = SyncStateUpdate::new().status(status);
        if let Err(e) = self.states().update_sync_state(account_id, &update) {
            error!("Failed to record sync status for {}: {:#}", account_id, e);
        }
    }
}
