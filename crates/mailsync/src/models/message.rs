//! Message model representing one synced Gmail message

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::LabelInfo;

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Boolean flags derived from the well-known system labels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    pub is_unread: bool,
    pub is_important: bool,
    pub is_starred: bool,
    pub is_spam: bool,
    pub is_inbox: bool,
    pub is_trash: bool,
    pub is_draft: bool,
    pub is_sent: bool,
}

/// Provider bookkeeping kept alongside each message
///
/// `history_id` is the remote cursor value observed when the message was
/// processed; it is what cursor recovery reads back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMetadata {
    #[serde(default, deserialize_with = "string_or_number")]
    pub history_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub size_estimate: Option<u64>,
}

impl ExternalMetadata {
    /// Parse the stored JSON blob
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> String {
        // Serializing plain strings and integers cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Older rows stored the history id as a JSON number.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .map(|v| v.to_string())
            .or_else(|| n.as_f64().map(|f| format!("{:.0}", f))),
        _ => None,
    })
}

/// A normalized, locally stored message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Gmail message ID, the upsert key
    pub id: MessageId,
    /// Account the message was synced for
    pub account_id: String,
    pub thread_id: String,
    /// Raw From header
    pub from: String,
    /// Raw To header
    pub to: String,
    pub subject: String,
    pub snippet: String,
    /// Decoded body, HTML preferred over plain text
    pub body: String,
    /// Remote-assigned creation time, used for checkpointing
    pub internal_date: DateTime<Utc>,
    /// Date from the topmost Received header, or `internal_date`
    pub received_date: DateTime<Utc>,
    pub flags: MessageFlags,
    /// Non-flag labels keyed by label id
    pub custom_labels: BTreeMap<String, LabelInfo>,
    pub external_metadata: ExternalMetadata,
}

impl Message {
    /// Create a new message builder
    pub fn builder(id: MessageId, account_id: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(id, account_id.into())
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    id: MessageId,
    account_id: String,
    thread_id: String,
    from: String,
    to: String,
    subject: String,
    snippet: String,
    body: String,
    internal_date: Option<DateTime<Utc>>,
    received_date: Option<DateTime<Utc>>,
    flags: MessageFlags,
    custom_labels: BTreeMap<String, LabelInfo>,
    external_metadata: ExternalMetadata,
}

impl MessageBuilder {
    fn new(id: MessageId, account_id: String) -> Self {
        Self {
            thread_id: id.as_str().to_string(),
            id,
            account_id,
            from: String::new(),
            to: String::new(),
            subject: String::new(),
            snippet: String::new(),
            body: String::new(),
            internal_date: None,
            received_date: None,
            flags: MessageFlags::default(),
            custom_labels: BTreeMap::new(),
            external_metadata: ExternalMetadata::default(),
        }
    }

    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn internal_date(mut self, internal_date: DateTime<Utc>) -> Self {
        self.internal_date = Some(internal_date);
        self
    }

    /// Convenience for Gmail's millisecond timestamps
    pub fn internal_date_millis(mut self, millis: i64) -> Self {
        self.internal_date = Utc.timestamp_millis_opt(millis).single();
        self
    }

    pub fn received_date(mut self, received_date: DateTime<Utc>) -> Self {
        self.received_date = Some(received_date);
        self
    }

    pub fn flags(mut self, flags: MessageFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn custom_labels(mut self, custom_labels: BTreeMap<String, LabelInfo>) -> Self {
        self.custom_labels = custom_labels;
        self
    }

    pub fn external_metadata(mut self, external_metadata: ExternalMetadata) -> Self {
        self.external_metadata = external_metadata;
        self
    }

    pub fn history_id(mut self, history_id: impl Into<String>) -> Self {
        self.external_metadata.history_id = Some(history_id.into());
        self
    }

    pub fn build(self) -> Message {
        let internal_date = self.internal_date.unwrap_or_else(Utc::now);
        Message {
            id: self.id,
            account_id: self.account_id,
            thread_id: self.thread_id,
            from: self.from,
            to: self.to,
            subject: self.subject,
            snippet: self.snippet,
            body: self.body,
            internal_date,
            received_date: self.received_date.unwrap_or(internal_date),
            flags: self.flags,
            custom_labels: self.custom_labels,
            external_metadata: self.external_metadata,
        }
    }
}
