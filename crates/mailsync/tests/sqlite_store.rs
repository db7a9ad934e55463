//! Engine runs against the SQLite backend, including restarts between runs

mod common;

use std::sync::Arc;

use common::*;
use mailsync::models::SyncStatus;
use mailsync::{
    MessageId, MessageStore, SqliteMailStore, SyncError, SyncRunner, SyncStateStore,
    SyncStrategy,
};
use tempfile::TempDir;

fn open(dir: &TempDir) -> Arc<SqliteMailStore> {
    Arc::new(SqliteMailStore::new(dir.path().join("mailsync.sqlite")).unwrap())
}

#[test]
fn test_full_sync_persists_to_sqlite() {
    let dir = TempDir::new().unwrap();
    let mailbox = FakeMailbox::with_messages(30);
    let store = open(&dir);
    link(store.as_ref());

    engine(&mailbox, &store, config(3)).sync(ACCOUNT).unwrap();
    drop(store);

    let store = open(&dir);
    assert_eq!(store.count_messages(ACCOUNT).unwrap(), 30);
    let state = state(store.as_ref());
    assert_eq!(state.cursor, "9000");
    assert_eq!(state.full_sync_checkpoint, None);
    assert_eq!(state.label_catalog.get("Label_1").unwrap().name, "Receipts");

    let msg = store.get_message(&MessageId::new(id(3))).unwrap().unwrap();
    assert_eq!(msg.internal_date, ts(3));
    assert_eq!(msg.external_metadata.history_id, Some(history_id(3)));
}

#[test]
fn test_checkpoint_survives_restart() {
    let dir = TempDir::new().unwrap();
    let mailbox = FakeMailbox::with_messages(60);
    mailbox.rate_limited.lock().unwrap().insert(id(25));

    {
        let store = open(&dir);
        link(store.as_ref());
        let mut cfg = config(1);
        cfg.queue_capacity = 1;
        let err = engine(&mailbox, &store, cfg).sync(ACCOUNT).unwrap_err();
        assert!(matches!(err, SyncError::RateLimited { .. }));
    }

    mailbox.rate_limited.lock().unwrap().clear();
    mailbox.reset_counters();

    let store = open(&dir);
    assert_eq!(state(store.as_ref()).full_sync_checkpoint, Some(ts(24)));

    let stats = engine(&mailbox, &store, config(3)).sync(ACCOUNT).unwrap();
    assert_eq!(stats.strategy, SyncStrategy::FullResume);
    assert_eq!(mailbox.full_fetches(), 35);
    assert_eq!(store.count_messages(ACCOUNT).unwrap(), 60);
}

#[test]
fn test_runner_status_persists() {
    let dir = TempDir::new().unwrap();
    let mailbox = FakeMailbox::with_messages(4);
    let store = open(&dir);
    link(store.as_ref());

    let runner = SyncRunner::new(Arc::new(engine(&mailbox, &store, config(2))));
    runner.run(ACCOUNT).unwrap();
    drop(runner);
    drop(store);

    let store = open(&dir);
    assert_eq!(
        store.get_sync_state(ACCOUNT).unwrap().unwrap().sync_status,
        SyncStatus::Completed
    );
}
