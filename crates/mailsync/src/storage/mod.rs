//! Storage traits and implementations
//!
//! The sync engine only talks to the traits; backends are swapped freely
//! between the in-memory store (tests) and SQLite.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::{CredentialStore, MailStore, MessageStore, SyncStateStore};
