//! Fetch, normalize and store a single message

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::SyncError;
use crate::gmail::{RemoteMailClient, normalize_message};
use super::LabelCache;
use crate::models::MessageId;
use crate::storage::MessageStore;

/// Turns a remote message id into a stored message
///
/// Shared by the full-sync workers and the history walk.
pub struct MessageProcessor {
    client: Arc<dyn RemoteMailClient>,
    store: Arc<dyn MessageStore>,
    account_id: String,
    labels: Arc<LabelCache>,
}

impl MessageProcessor {
    pub fn new(
        client: Arc<dyn RemoteMailClient>,
        store: Arc<dyn MessageStore>,
        account_id: impl Into<String>,
        labels: Arc<LabelCache>,
    ) -> Self {
        Self {
            client,
            store,
            account_id: account_id.into(),
            labels,
        }
    }

    /// Fetch the full message and upsert it, returning its `internal_date`
    pub fn process(&self, id: &MessageId) -> Result<DateTime<Utc>, SyncError> {
        let raw = self.client.get_message(id)?;
        let catalog = self
            .labels
            .resolve(raw.label_ids.as_deref().unwrap_or_default());
        let message = normalize_message(raw, &self.account_id, &catalog).map_err(|e| {
            SyncError::Malformed {
                message_id: id.to_string(),
                reason: format!("{:#}", e),
            }
        })?;
        drop(catalog);

        let internal_date = message.internal_date;
        self.store.upsert_message(message)?;
        Ok(internal_date)
    }
}
