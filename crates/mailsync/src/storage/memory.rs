//! In-memory storage implementation
//!
//! Used by tests and by embedders that keep state elsewhere.

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{CredentialStore, MessageStore, SyncStateStore};
use crate::models::{Message, MessageId, StoredToken, SyncState, SyncStateUpdate};

/// In-memory implementation of every store trait
///
/// Uses maps protected by RwLocks for thread-safe access.
#[derive(Default)]
pub struct InMemoryMailStore {
    messages: RwLock<HashMap<String, Message>>,
    sync_states: RwLock<BTreeMap<String, SyncState>>,
    credentials: RwLock<HashMap<String, StoredToken>>,
    /// Attempt counts keyed by (account, remote id)
    failures: RwLock<HashMap<(String, MessageId), u32>>,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

impl MessageStore for InMemoryMailStore {
    fn upsert_message(&self, message: Message) -> Result<()> {
        let mut messages = self.messages.write().map_err(poisoned)?;
        messages.insert(message.id.as_str().to_string(), message);
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let messages = self.messages.read().map_err(poisoned)?;
        Ok(messages.get(id.as_str()).cloned())
    }

    fn find_latest_by_received(&self, account_id: &str) -> Result<Option<Message>> {
        let messages = self.messages.read().map_err(poisoned)?;
        Ok(messages
            .values()
            .filter(|m| m.account_id == account_id)
            .max_by_key(|m| (m.received_date, m.id.clone()))
            .cloned())
    }

    fn find_oldest_internal_date(&self, account_id: &str) -> Result<Option<DateTime<Utc>>> {
        let messages = self.messages.read().map_err(poisoned)?;
        Ok(messages
            .values()
            .filter(|m| m.account_id == account_id)
            .map(|m| m.internal_date)
            .min())
    }

    fn count_messages(&self, account_id: &str) -> Result<usize> {
        let messages = self.messages.read().map_err(poisoned)?;
        Ok(messages
            .values()
            .filter(|m| m.account_id == account_id)
            .count())
    }

    fn record_message_failure(
        &self,
        account_id: &str,
        id: &MessageId,
        _error: &str,
    ) -> Result<u32> {
        let mut failures = self.failures.write().map_err(poisoned)?;
        let attempts = failures
            .entry((account_id.to_string(), id.clone()))
            .or_insert(0);
        *attempts += 1;
        Ok(*attempts)
    }

    fn clear_message_failure(&self, account_id: &str, id: &MessageId) -> Result<()> {
        let mut failures = self.failures.write().map_err(poisoned)?;
        failures.remove(&(account_id.to_string(), id.clone()));
        Ok(())
    }

    fn message_failures(&self, account_id: &str) -> Result<HashMap<MessageId, u32>> {
        let failures = self.failures.read().map_err(poisoned)?;
        Ok(failures
            .iter()
            .filter(|((account, _), _)| account == account_id)
            .map(|((_, id), attempts)| (id.clone(), *attempts))
            .collect())
    }
}

impl SyncStateStore for InMemoryMailStore {
    fn get_sync_state(&self, account_id: &str) -> Result<Option<SyncState>> {
        let states = self.sync_states.read().map_err(poisoned)?;
        Ok(states.get(account_id).cloned())
    }

    fn create_sync_state(&self, state: SyncState) -> Result<SyncState> {
        let mut states = self.sync_states.write().map_err(poisoned)?;
        let catalog = state.label_catalog.clone();
        let stored = states
            .entry(state.account_id.clone())
            .and_modify(move |existing| existing.label_catalog = catalog)
            .or_insert(state);
        Ok(stored.clone())
    }

    fn update_sync_state(&self, account_id: &str, update: &SyncStateUpdate) -> Result<()> {
        let mut states = self.sync_states.write().map_err(poisoned)?;
        match states.get_mut(account_id) {
            Some(state) => {
                state.apply(update);
                Ok(())
            }
            None => bail!("No sync state for account {}", account_id),
        }
    }

    fn list_sync_states(&self) -> Result<Vec<SyncState>> {
        let states = self.sync_states.read().map_err(poisoned)?;
        Ok(states.values().cloned().collect())
    }
}

impl CredentialStore for InMemoryMailStore {
    fn load_credential(&self, account_id: &str) -> Result<Option<StoredToken>> {
        let credentials = self.credentials.read().map_err(poisoned)?;
        Ok(credentials.get(account_id).cloned())
    }

    fn save_credential(&self, account_id: &str, token: &StoredToken) -> Result<()> {
        let mut credentials = self.credentials.write().map_err(poisoned)?;
        credentials.insert(account_id.to_string(), token.clone());
        Ok(())
    }

    fn mark_credential_inactive(&self, account_id: &str) -> Result<()> {
        let mut credentials = self.credentials.write().map_err(poisoned)?;
        match credentials.get_mut(account_id) {
            Some(token) => {
                token.is_active = false;
                Ok(())
            }
            None => bail!("No credential for account {}", account_id),
        }
    }
}
