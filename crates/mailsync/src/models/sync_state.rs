//! Sync state tracking for full and incremental Gmail sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LabelCatalog;

/// Longest failure message kept in `SyncStatus::Failed`
pub const MAX_STATUS_MESSAGE: usize = 200;

/// Bookkeeping written around each sync run
///
/// A state left at `InProgress` after a restart means the process died
/// mid-sync; the runner resumes those on startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum SyncStatus {
    #[default]
    Idle,
    InProgress,
    Completed,
    Failed(String),
    Inactive,
}

impl SyncStatus {
    /// Build a failure status, truncating long error text
    pub fn failed(message: impl AsRef<str>) -> Self {
        let message: String = message.as_ref().chars().take(MAX_STATUS_MESSAGE).collect();
        SyncStatus::Failed(message)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, SyncStatus::InProgress)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Idle => f.write_str("idle"),
            SyncStatus::InProgress => f.write_str("in_progress"),
            SyncStatus::Completed => f.write_str("completed"),
            SyncStatus::Failed(msg) => write!(f, "failed: {}", msg),
            SyncStatus::Inactive => f.write_str("inactive"),
        }
    }
}

impl From<SyncStatus> for String {
    fn from(status: SyncStatus) -> Self {
        status.to_string()
    }
}

impl From<String> for SyncStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "in_progress" => SyncStatus::InProgress,
            "completed" => SyncStatus::Completed,
            "inactive" => SyncStatus::Inactive,
            "idle" | "" => SyncStatus::Idle,
            other => match other.strip_prefix("failed:") {
                Some(msg) => SyncStatus::Failed(msg.trim_start().to_string()),
                None => SyncStatus::Failed(other.to_string()),
            },
        }
    }
}

/// Tracks sync progress for one account
///
/// Persisted separately from messages. Only one SyncState per account.
/// A set `full_sync_checkpoint` forces the next run into full-sync resume,
/// whether or not `cursor` is also set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Account (and credential) identifier
    pub account_id: String,
    /// Gmail historyId for incremental sync; empty until a sync completes
    pub cursor: String,
    /// Oldest message boundary reached by an interrupted full sync
    pub full_sync_checkpoint: Option<DateTime<Utc>>,
    /// When we last successfully synced
    pub last_synced_at: Option<DateTime<Utc>>,
    /// False once the credential is confirmed unrecoverable
    pub is_active: bool,
    pub label_catalog: LabelCatalog,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl SyncState {
    /// Create the state for a freshly linked account
    pub fn new(account_id: impl Into<String>, label_catalog: LabelCatalog) -> Self {
        Self {
            account_id: account_id.into(),
            cursor: String::new(),
            full_sync_checkpoint: None,
            last_synced_at: None,
            is_active: true,
            label_catalog,
            sync_status: SyncStatus::Idle,
        }
    }

    /// Whether the next run must resume an interrupted full sync
    pub fn needs_full_sync_resume(&self) -> bool {
        self.full_sync_checkpoint.is_some()
    }

    pub fn has_cursor(&self) -> bool {
        !self.cursor.is_empty()
    }

    /// Apply a partial update in place
    pub fn apply(&mut self, update: &SyncStateUpdate) {
        if let Some(cursor) = &update.cursor {
            self.cursor = cursor.clone();
        }
        if let Some(checkpoint) = update.full_sync_checkpoint {
            self.full_sync_checkpoint = checkpoint;
        }
        if let Some(last_synced_at) = update.last_synced_at {
            self.last_synced_at = Some(last_synced_at);
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        if let Some(catalog) = &update.label_catalog {
            self.label_catalog = catalog.clone();
        }
        if let Some(status) = &update.sync_status {
            self.sync_status = status.clone();
        }
    }
}

/// Partial update of a [`SyncState`]; unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStateUpdate {
    pub cursor: Option<String>,
    /// `Some(None)` clears the checkpoint
    pub full_sync_checkpoint: Option<Option<DateTime<Utc>>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub label_catalog: Option<LabelCatalog>,
    pub sync_status: Option<SyncStatus>,
}

impl SyncStateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn checkpoint(mut self, checkpoint: DateTime<Utc>) -> Self {
        self.full_sync_checkpoint = Some(Some(checkpoint));
        self
    }

    pub fn clear_checkpoint(mut self) -> Self {
        self.full_sync_checkpoint = Some(None);
        self
    }

    pub fn synced_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_synced_at = Some(at);
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    pub fn label_catalog(mut self, catalog: LabelCatalog) -> Self {
        self.label_catalog = Some(catalog);
        self
    }

    pub fn status(mut self, status: SyncStatus) -> Self {
        self.sync_status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_sync_state() {
        let state = SyncState::new("user@gmail.com", LabelCatalog::new());
        assert_eq!(state.account_id, "user@gmail.com");
        assert!(state.cursor.is_empty());
        assert!(state.is_active);
        assert!(!state.needs_full_sync_resume());
        assert!(!state.has_cursor());
    }

    #[test]
    fn test_apply_partial_update() {
        let mut state = SyncState::new("user@gmail.com", LabelCatalog::new());
        let checkpoint = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();

        state.apply(&SyncStateUpdate::new().checkpoint(checkpoint));
        assert_eq!(state.full_sync_checkpoint, Some(checkpoint));
        assert!(state.cursor.is_empty());

        let now = Utc::now();
        state.apply(
            &SyncStateUpdate::new()
                .clear_checkpoint()
                .cursor("12345")
                .synced_at(now),
        );
        assert_eq!(state.full_sync_checkpoint, None);
        assert_eq!(state.cursor, "12345");
        assert_eq!(state.last_synced_at, Some(now));
        assert!(state.is_active);
    }

    #[test]
    fn test_empty_update() {
        assert!(SyncStateUpdate::new().is_empty());
        assert!(!SyncStateUpdate::new().active(false).is_empty());
    }

    #[test]
    fn test_status_string_form() {
        assert_eq!(SyncStatus::InProgress.to_string(), "in_progress");
        assert_eq!(
            SyncStatus::from("failed: boom".to_string()),
            SyncStatus::Failed("boom".to_string())
        );
        assert_eq!(SyncStatus::from("completed".to_string()), SyncStatus::Completed);
        assert_eq!(SyncStatus::from(String::new()), SyncStatus::Idle);
    }

    #[test]
    fn test_failed_status_truncates() {
        let status = SyncStatus::failed("x".repeat(500));
        match status {
            SyncStatus::Failed(msg) => assert_eq!(msg.len(), MAX_STATUS_MESSAGE),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn test_serialization() {
        let mut state = SyncState::new("user@gmail.com", LabelCatalog::new());
        state.sync_status = SyncStatus::failed("timeout");
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
