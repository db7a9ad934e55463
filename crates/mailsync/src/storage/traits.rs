//! Storage trait definitions

use crate::models::{Message, MessageId, StoredToken, SyncState, SyncStateUpdate};
use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Message persistence
///
/// Messages are keyed by remote id; `upsert_message` must never create a
/// second row for the same id.
pub trait MessageStore: Send + Sync {
    /// Insert or update a message keyed by its remote id
    fn upsert_message(&self, message: Message) -> Result<()>;

    /// Get a message by remote id
    fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Most recently received message for an account (by `received_date`)
    fn find_latest_by_received(&self, account_id: &str) -> Result<Option<Message>>;

    /// Oldest stored `internal_date` for an account
    fn find_oldest_internal_date(&self, account_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Count stored messages for an account
    fn count_messages(&self, account_id: &str) -> Result<usize>;

    /// Record one more failed sync attempt, returning the attempt count
    fn record_message_failure(&self, account_id: &str, id: &MessageId, error: &str)
    -> Result<u32>;

    /// Forget the failure history of a message
    fn clear_message_failure(&self, account_id: &str, id: &MessageId) -> Result<()>;

    /// Messages with recorded failures and their attempt counts
    fn message_failures(&self, account_id: &str) -> Result<HashMap<MessageId, u32>>;
}

/// Sync state persistence
pub trait SyncStateStore: Send + Sync {
    /// Get sync state for an account
    fn get_sync_state(&self, account_id: &str) -> Result<Option<SyncState>>;

    /// Insert a new sync state, or replace the label catalog of an existing one
    fn create_sync_state(&self, state: SyncState) -> Result<SyncState>;

    /// Write only the fields set in `update`
    ///
    /// Fails if the account has no sync state.
    fn update_sync_state(&self, account_id: &str, update: &SyncStateUpdate) -> Result<()>;

    /// All sync states, ordered by account id
    fn list_sync_states(&self) -> Result<Vec<SyncState>>;
}

/// Credential persistence
pub trait CredentialStore: Send + Sync {
    fn load_credential(&self, account_id: &str) -> Result<Option<StoredToken>>;

    /// Insert or replace the token material for an account
    fn save_credential(&self, account_id: &str, token: &StoredToken) -> Result<()>;

    /// Flag the credential as permanently rejected
    fn mark_credential_inactive(&self, account_id: &str) -> Result<()>;
}

/// Convenience bound for backends that implement every store
pub trait MailStore: MessageStore + SyncStateStore + CredentialStore {}

impl<T: MessageStore + SyncStateStore + CredentialStore> MailStore for T {}
