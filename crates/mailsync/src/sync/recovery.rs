//! Rebuild sync bookkeeping from locally stored messages

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;

use crate::error::RecoveryError;
use crate::storage::MessageStore;

/// Derives a cursor or checkpoint from what is already stored
///
/// Used when the remote cannot hand out a fresh cursor, and when a run died
/// before it wrote any bookkeeping.
#[derive(Clone)]
pub struct RecoveryService {
    messages: Arc<dyn MessageStore>,
}

impl RecoveryService {
    pub fn new(messages: Arc<dyn MessageStore>) -> Self {
        Self { messages }
    }

    /// History id recorded on the most recently received stored message
    pub fn recover_cursor(&self, account_id: &str) -> Result<String, RecoveryError> {
        let latest = self
            .messages
            .find_latest_by_received(account_id)?
            .ok_or_else(|| RecoveryError::NoMessagesFound {
                account_id: account_id.to_string(),
            })?;

        let cursor = latest
            .external_metadata
            .history_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RecoveryError::MetadataMissing {
                message_id: latest.id.to_string(),
            })?;

        info!(
            "Recovered cursor {} for {} from message {}",
            cursor, account_id, latest.id
        );
        Ok(cursor)
    }

    /// Oldest stored `internal_date`, `None` when nothing is stored
    pub fn recover_checkpoint(
        &self,
        account_id: &str,
    ) -> Result<Option<DateTime<Utc>>, RecoveryError> {
        Ok(self.messages.find_oldest_internal_date(account_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExternalMetadata, Message, MessageId};
    use crate::storage::InMemoryMailStore;
    use chrono::TimeZone;

    fn message(id: &str, received_secs: i64, history_id: Option<&str>) -> Message {
        let at = Utc.timestamp_opt(received_secs, 0).unwrap();
        Message::builder(MessageId::new(id), "acct")
            .internal_date(at)
            .received_date(at)
            .external_metadata(ExternalMetadata {
                history_id: history_id.map(str::to_string),
                ..Default::default()
            })
            .build()
    }

    fn service_with(messages: Vec<Message>) -> RecoveryService {
        let store = Arc::new(InMemoryMailStore::new());
        for m in messages {
            store.upsert_message(m).unwrap();
        }
        RecoveryService::new(store)
    }

    #[test]
    fn test_recover_from_latest_received() {
        let service = service_with(vec![
            message("old", 100, Some("10")),
            message("new", 300, Some("30")),
            message("mid", 200, Some("20")),
        ]);
        assert_eq!(service.recover_cursor("acct").unwrap(), "30");
    }

    #[test]
    fn test_no_messages() {
        let service = service_with(Vec::new());
        assert!(matches!(
            service.recover_cursor("acct"),
            Err(RecoveryError::NoMessagesFound { .. })
        ));
        assert_eq!(service.recover_checkpoint("acct").unwrap(), None);
    }

    #[test]
    fn test_latest_message_without_history_id() {
        let service = service_with(vec![
            message("old", 100, Some("10")),
            message("new", 300, None),
        ]);
        match service.recover_cursor("acct") {
            Err(RecoveryError::MetadataMissing { message_id }) => assert_eq!(message_id, "new"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_recover_checkpoint_is_oldest() {
        let service = service_with(vec![
            message("a", 300, Some("30")),
            message("b", 100, Some("10")),
        ]);
        assert_eq!(
            service.recover_checkpoint("acct").unwrap(),
            Some(Utc.timestamp_opt(100, 0).unwrap())
        );
    }
}
