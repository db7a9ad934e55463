//! Sync engine for fetching and storing mail
//!
//! Sync operations are idempotent and can be safely retried: messages are
//! upserted by remote id, and an interrupted full sync resumes from its
//! persisted checkpoint.

mod checkpoint;
mod engine;
mod failures;
mod full;
mod incremental;
mod labels;
mod pool;
mod processor;
mod recovery;
mod runner;
mod schedule;
mod stats;

pub use checkpoint::CheckpointTracker;
pub use engine::{SyncEngine, catalog_from_labels};
pub use labels::LabelCache;
pub use processor::MessageProcessor;
pub use recovery::RecoveryService;
pub use runner::{AccountRun, SyncRunner};
pub use stats::{SyncOutcome, SyncStats, SyncStrategy};
pub use schedule::is_due;
