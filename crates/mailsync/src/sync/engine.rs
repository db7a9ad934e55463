//! Sync orchestration: picks a strategy per account and owns state writes

use std::sync::Arc;

use anyhow::Context;
use log::{error, info, warn};

use super::failures::FailureLedger;
use super::full::full_sync;
use super::incremental::incremental_sync;
use super::{LabelCache, MessageProcessor, RecoveryService, SyncStats, SyncStrategy};
use crate::cancel::CancelScope;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::gmail::api::Label;
use crate::gmail::{RemoteMailClient, TokenProvider};
use crate::models::{LabelCatalog, LabelInfo, LabelKind, SyncState, SyncStateUpdate, SyncStatus};
use crate::storage::{MessageStore, SyncStateStore};

/// Entry point for syncing linked accounts
///
/// All collaborators are injected so tests can substitute fakes. One engine
/// can serve many accounts; each `sync` call gets its own cancel scope.
pub struct SyncEngine {
    tokens: Arc<dyn TokenProvider>,
    messages: Arc<dyn MessageStore>,
    states: Arc<dyn SyncStateStore>,
    recovery: RecoveryService,
    config: SyncConfig,
    pool: rayon::ThreadPool,
}

impl SyncEngine {
    pub fn new(
        tokens: Arc<dyn TokenProvider>,
        messages: Arc<dyn MessageStore>,
        states: Arc<dyn SyncStateStore>,
        config: SyncConfig,
    ) -> anyhow::Result<Self> {
        let config = config.validated();
        // Workers plus the listing producer
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers + 1)
            .thread_name(|i| format!("mailsync-worker-{}", i))
            .build()
            .context("Failed to build sync thread pool")?;

        Ok(Self {
            recovery: RecoveryService::new(messages.clone()),
            tokens,
            messages,
            states,
            config,
            pool,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn recovery(&self) -> &RecoveryService {
        &self.recovery
    }

    pub(crate) fn states(&self) -> &Arc<dyn SyncStateStore> {
        &self.states
    }

    /// Fetch the label catalog and create (or refresh) the account's state
    pub fn link_account(&self, account_id: &str) -> Result<SyncState, SyncError> {
        let scope = Arc::new(CancelScope::with_timeout(self.config.sync_timeout()));
        let client = self.tokens.client(account_id, &scope)?;
        let catalog = catalog_from_labels(client.list_labels()?);
        info!("Linking {} with {} labels", account_id, catalog.len());

        Ok(self
            .states
            .create_sync_state(SyncState::new(account_id, catalog))?)
    }

    /// Bring the local mailbox up to date with the remote
    ///
    /// A stored checkpoint always means full-sync resume. Otherwise a cursor
    /// means an incremental walk, falling back to a fresh full sync when the
    /// cursor has expired or the walk fails non-fatally.
    pub fn sync(&self, account_id: &str) -> Result<SyncStats, SyncError> {
        let result = self.sync_account(account_id);
        match &result {
            Ok(stats) => info!(
                "Sync of {} finished ({}{}): {} processed, {} skipped, {} failed in {}ms",
                account_id,
                stats.strategy,
                if stats.fell_back { ", fell back" } else { "" },
                stats.messages_processed,
                stats.messages_skipped,
                stats.messages_failed,
                stats.duration_ms
            ),
            Err(e) if e.is_credential_error() => {
                warn!("Deactivating {}: {}", account_id, e);
                self.deactivate(account_id);
            }
            Err(e) => warn!("Sync of {} failed: {}", account_id, e),
        }
        result
    }

    fn sync_account(&self, account_id: &str) -> Result<SyncStats, SyncError> {
        let scope = Arc::new(CancelScope::with_timeout(self.config.sync_timeout()));

        let state = self
            .states
            .get_sync_state(account_id)?
            .ok_or_else(|| SyncError::NotLinked {
                account_id: account_id.to_string(),
            })?;
        if !state.is_active {
            return Err(SyncError::CredentialInactive {
                account_id: account_id.to_string(),
            });
        }

        let client = self.tokens.client(account_id, &scope)?;
        let labels = Arc::new(LabelCache::load(
            account_id,
            state.label_catalog.clone(),
            client.clone(),
            self.states.clone(),
        ));

        let ctx = RunContext {
            account_id,
            client,
            scope,
            labels,
            messages: &self.messages,
            states: self.states.as_ref(),
            recovery: &self.recovery,
            config: &self.config,
            pool: &self.pool,
        };

        if let Some(checkpoint) = state.full_sync_checkpoint {
            info!(
                "Resuming full sync for {} from checkpoint {}",
                account_id, checkpoint
            );
            let mut stats = SyncStats::new(SyncStrategy::FullResume);
            full_sync(&ctx, Some(checkpoint), &mut stats)?;
            return Ok(stats.finish());
        }

        if state.has_cursor() {
            info!(
                "Starting incremental sync for {} from cursor {}",
                account_id, state.cursor
            );
            let mut incremental = SyncStats::new(SyncStrategy::Incremental);
            match incremental_sync(&ctx, &state.cursor, &mut incremental) {
                Ok(()) => return Ok(incremental.finish()),
                Err(e @ SyncError::CursorExpired { .. }) => {
                    info!("{} for {}, running full sync", e, account_id);
                }
                Err(e) if e.allows_fallback() => {
                    warn!(
                        "Incremental sync for {} failed, running full sync: {}",
                        account_id, e
                    );
                }
                Err(e) => return Err(e),
            }

            let mut stats = SyncStats::fallback_from(&incremental);
            full_sync(&ctx, None, &mut stats)?;
            return Ok(stats.finish());
        }

        info!("Starting full sync for {}", account_id);
        let mut stats = SyncStats::new(SyncStrategy::Full);
        full_sync(&ctx, None, &mut stats)?;
        Ok(stats.finish())
    }

    fn deactivate(&self, account_id: &str) {
        let update = SyncStateUpdate::new()
            .active(false)
            .status(SyncStatus::Inactive);
        if let Err(e) = self.states.update_sync_state(account_id, &update) {
            error!("Failed to deactivate {}: {:#}", account_id, e);
        }
    }
}

/// Build a catalog from the labels API response
pub fn catalog_from_labels(labels: Vec<Label>) -> LabelCatalog {
    labels
        .into_iter()
        .map(|label| {
            let kind = match label.label_type.as_deref() {
                Some("system") => LabelKind::System,
                Some("user") => LabelKind::User,
                _ => LabelKind::Unknown,
            };
            (label.id, LabelInfo::new(label.name, kind))
        })
        .collect()
}

/// Everything one sync call shares across its strategies
pub(crate) struct RunContext<'a> {
    pub account_id: &'a str,
    pub client: Arc<dyn RemoteMailClient>,
    pub scope: Arc<CancelScope>,
    pub labels: Arc<LabelCache>,
    pub messages: &'a Arc<dyn MessageStore>,
    pub states: &'a dyn SyncStateStore,
    pub recovery: &'a RecoveryService,
    pub config: &'a SyncConfig,
    pub pool: &'a rayon::ThreadPool,
}

impl RunContext<'_> {
    pub fn processor(&self) -> MessageProcessor {
        MessageProcessor::new(
            self.client.clone(),
            self.messages.clone(),
            self.account_id,
            self.labels.clone(),
        )
    }

    /// Failure history of this account as of now
    pub fn failures(&self) -> FailureLedger {
        FailureLedger::load(
            self.messages.clone(),
            self.account_id,
            self.config.max_message_attempts,
        )
    }

    /// Fresh remote cursor, or one recovered from stored messages
    pub fn resolve_cursor(&self) -> Result<String, SyncError> {
        match self.client.get_profile() {
            Ok(profile) if !profile.history_id.is_empty() => Ok(profile.history_id),
            Ok(_) => {
                warn!(
                    "Profile for {} has no history id, recovering cursor",
                    self.account_id
                );
                Ok(self.recovery.recover_cursor(self.account_id)?)
            }
            Err(e) => {
                let e = SyncError::from(e);
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(
                    "Could not fetch cursor for {}, recovering from stored messages: {}",
                    self.account_id, e
                );
                Ok(self.recovery.recover_cursor(self.account_id)?)
            }
        }
    }

    pub fn update_state(&self, update: &SyncStateUpdate) -> Result<(), SyncError> {
        Ok(self.states.update_sync_state(self.account_id, update)?)
    }
}
