//! Domain models for synced mail entities

mod credential;
mod label;
mod message;
mod sync_state;

pub use credential::{EXPIRY_SKEW_SECS, StoredToken};
pub use label::{LabelCatalog, LabelId, LabelInfo, LabelKind, classify_labels};
pub use message::{ExternalMetadata, Message, MessageBuilder, MessageFlags, MessageId};
pub use sync_state::{MAX_STATUS_MESSAGE, SyncState, SyncStateUpdate, SyncStatus};
