//! Gmail API integration
//!
//! This module provides:
//! - The [`RemoteMailClient`] capability the sync engine consumes
//! - OAuth token sources (refresh, persistence) and the client factory
//! - A blocking Gmail REST client over ureq
//! - Response normalization to domain models

mod auth;
mod client;
mod error;
mod normalize;
mod provider;

pub use auth::{AuthError, PersistingTokenSource, RefreshingTokenSource, TokenSource};
pub use client::GmailClient;
pub use error::GmailError;
pub use normalize::{normalize_message, parse_internal_date};
pub use provider::{GmailTokenProvider, TokenProvider};

use chrono::{DateTime, Utc};

use crate::models::MessageId;
use api::{GmailMessage, Label, ProfileResponse};

/// One page of message ids from a label listing, newest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePage {
    pub ids: Vec<MessageId>,
    pub next_page_token: Option<String>,
}

/// Kind of change reported by the history API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEventKind {
    MessageAdded,
    LabelsChanged,
}

/// One change in the mailbox history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEvent {
    pub kind: HistoryEventKind,
    pub message_id: MessageId,
}

impl HistoryEvent {
    pub fn added(id: impl Into<MessageId>) -> Self {
        Self {
            kind: HistoryEventKind::MessageAdded,
            message_id: id.into(),
        }
    }

    pub fn labels_changed(id: impl Into<MessageId>) -> Self {
        Self {
            kind: HistoryEventKind::LabelsChanged,
            message_id: id.into(),
        }
    }
}

/// One page of history events, in remote order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    pub events: Vec<HistoryEvent>,
    pub next_page_token: Option<String>,
    /// Mailbox history id at the time of the response
    pub history_id: Option<String>,
}

/// Remote mailbox capabilities used by the sync engine
///
/// Implementations must be shareable across worker threads.
pub trait RemoteMailClient: Send + Sync {
    /// List message ids carrying `label`, newest first
    fn list_messages(&self, label: &str, page_token: Option<&str>)
    -> Result<MessagePage, GmailError>;

    /// Fetch the full message (headers, body, labels)
    fn get_message(&self, id: &MessageId) -> Result<GmailMessage, GmailError>;

    /// Cheap fetch returning only the remote creation timestamp
    fn get_message_timestamp(&self, id: &MessageId) -> Result<DateTime<Utc>, GmailError>;

    /// Account profile, including the current history id
    fn get_profile(&self) -> Result<ProfileResponse, GmailError>;

    /// Changes since `start_history_id`
    ///
    /// Returns `GmailError::HistoryExpired` when the cursor is too old.
    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, GmailError>;

    /// The account's label catalog
    fn list_labels(&self) -> Result<Vec<Label>, GmailError>;
}

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        #[serde(default)]
        pub thread_id: String,
    }

    /// Full (or minimal) message from Gmail API
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        #[serde(default)]
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        pub history_id: Option<String>,
        /// Milliseconds since epoch, as a decimal string
        #[serde(default)]
        pub internal_date: String,
        pub size_estimate: Option<u64>,
        pub payload: Option<MessagePayload>,
    }

    /// Message payload containing headers and body
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
        pub mime_type: Option<String>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Message body (may be base64 encoded)
    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct MessageBody {
        pub size: Option<u32>,
        pub data: Option<String>,
    }

    /// Message part (for multipart messages)
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Response from users.getProfile
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProfileResponse {
        #[serde(default)]
        pub email_address: String,
        pub messages_total: Option<u64>,
        pub threads_total: Option<u64>,
        pub history_id: String,
    }

    /// Response from users.history.list
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        pub history_id: Option<String>,
    }

    /// One history record; a record may carry several change kinds
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: String,
        pub messages_added: Option<Vec<HistoryMessage>>,
        pub labels_added: Option<Vec<HistoryLabelChange>>,
        pub labels_removed: Option<Vec<HistoryLabelChange>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct HistoryMessage {
        pub message: MessageRef,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryLabelChange {
        pub message: MessageRef,
        #[serde(default)]
        pub label_ids: Vec<String>,
    }

    /// Response from users.labels.list
    #[derive(Debug, Deserialize)]
    pub struct ListLabelsResponse {
        pub labels: Option<Vec<Label>>,
    }

    /// A label as returned by the labels API
    #[derive(Debug, Clone, Deserialize)]
    pub struct Label {
        pub id: String,
        pub name: String,
        /// "system" or "user"
        #[serde(rename = "type")]
        pub label_type: Option<String>,
    }
}
