//! When a linked account is due for its next scheduled sync

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::SyncState;

/// Whether the scheduler should sync this account at `now`
///
/// Inactive accounts are never due. An account that has not completed a
/// sync yet is due at once; otherwise `cooldown` must have passed since
/// `last_synced_at`. A failed run leaves `last_synced_at` alone, so it is
/// retried on the next tick.
pub fn is_due(state: &SyncState, cooldown: Duration, now: DateTime<Utc>) -> bool {
    if !state.is_active {
        return false;
    }
    let Some(last) = state.last_synced_at else {
        return true;
    };
    match (now - last).to_std() {
        Ok(elapsed) => elapsed >= cooldown,
        // Clock stepped back past the last sync
        Err(_) => false,
    }
}
