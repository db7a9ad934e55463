//! Labels, the per-account label catalog and flag classification

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::MessageFlags;

/// Unique identifier for a label (Gmail label ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelId(pub String);

impl LabelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Well-known Gmail system labels that map to message flags
    pub const INBOX: &'static str = "INBOX";
    pub const SENT: &'static str = "SENT";
    pub const DRAFT: &'static str = "DRAFT";
    pub const TRASH: &'static str = "TRASH";
    pub const SPAM: &'static str = "SPAM";
    pub const STARRED: &'static str = "STARRED";
    pub const IMPORTANT: &'static str = "IMPORTANT";
    pub const UNREAD: &'static str = "UNREAD";

    /// Whether `id` becomes a message flag instead of a custom label
    pub fn is_flag(id: &str) -> bool {
        matches!(
            id,
            Self::INBOX
                | Self::SENT
                | Self::DRAFT
                | Self::TRASH
                | Self::SPAM
                | Self::STARRED
                | Self::IMPORTANT
                | Self::UNREAD
        )
    }
}

impl From<&str> for LabelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Semantic label type as reported by Gmail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelKind {
    System,
    User,
    #[serde(other)]
    Unknown,
}

/// Catalog entry for one label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LabelKind,
}

impl LabelInfo {
    pub fn new(name: impl Into<String>, kind: LabelKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Mapping from remote label id to its name and type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelCatalog(BTreeMap<String, LabelInfo>);

impl LabelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, info: LabelInfo) {
        self.0.insert(id.into(), info);
    }

    pub fn get(&self, id: &str) -> Option<&LabelInfo> {
        self.0.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Custom label ids in `label_ids` that have no entry here
    pub fn unknown_labels<'a>(&'a self, label_ids: &'a [String]) -> impl Iterator<Item = &'a str> {
        label_ids
            .iter()
            .map(String::as_str)
            .filter(move |id| !LabelId::is_flag(id) && !self.0.contains_key(*id))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl FromIterator<(String, LabelInfo)> for LabelCatalog {
    fn from_iter<I: IntoIterator<Item = (String, LabelInfo)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Split a message's label ids into flags and custom labels.
///
/// The eight flag labels never appear in the custom map. Any other label is
/// kept: with its catalog entry when known, verbatim otherwise.
pub fn classify_labels(
    label_ids: &[String],
    catalog: &LabelCatalog,
) -> (MessageFlags, BTreeMap<String, LabelInfo>) {
    let mut flags = MessageFlags::default();
    let mut custom = BTreeMap::new();

    for id in label_ids {
        match id.as_str() {
            LabelId::UNREAD => flags.is_unread = true,
            LabelId::IMPORTANT => flags.is_important = true,
            LabelId::STARRED => flags.is_starred = true,
            LabelId::SPAM => flags.is_spam = true,
            LabelId::INBOX => flags.is_inbox = true,
            LabelId::TRASH => flags.is_trash = true,
            LabelId::DRAFT => flags.is_draft = true,
            LabelId::SENT => flags.is_sent = true,
            other => {
                let info = catalog
                    .get(other)
                    .cloned()
                    .unwrap_or_else(|| LabelInfo::new(other, LabelKind::Unknown));
                custom.insert(other.to_string(), info);
            }
        }
    }

    (flags, custom)
}
