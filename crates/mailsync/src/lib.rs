//! Mailsync - Gmail mailbox synchronization engine
//!
//! This crate keeps a local message store in step with a Gmail mailbox:
//! - Domain models (Message, SyncState, StoredToken, label catalog)
//! - Gmail API client and OAuth token handling
//! - Storage trait abstractions with in-memory and SQLite backends
//! - Resumable full sync and history-driven incremental sync
//! - A runner for scheduled syncs and recovery of interrupted runs
//!
//! All network I/O is blocking and bounded by a per-sync cancel scope, so the
//! crate has no async runtime dependency.

pub mod cancel;
pub mod config;
pub mod error;
pub mod gmail;
pub mod models;
pub mod storage;
pub mod sync;

pub use cancel::CancelScope;
pub use config::{GmailCredentials, MetadataFailurePolicy, SyncConfig};
pub use error::{RecoveryError, SyncError};
pub use gmail::{
    AuthError, GmailClient, GmailError, GmailTokenProvider, HistoryEvent, HistoryEventKind,
    HistoryPage, MessagePage, RemoteMailClient, TokenProvider,
};
pub use models::{
    LabelCatalog, LabelId, LabelInfo, LabelKind, Message, MessageId, StoredToken, SyncState,
    SyncStateUpdate, SyncStatus,
};
pub use storage::{
    CredentialStore, InMemoryMailStore, MailStore, MessageStore, SqliteMailStore, SyncStateStore,
};
pub use sync::{
    LabelCache, MessageProcessor, RecoveryService, SyncEngine, SyncOutcome, SyncRunner, SyncStats,
    SyncStrategy, is_due,
};
