//! Resume watermark for full sync
//!
//! Jobs complete out of order across workers. The tracker only trusts the
//! contiguous prefix of completed jobs in listing order: a job that failed
//! or never ran leaves a hole, and nothing listed after the hole can move
//! the watermark. Since listing is newest first, every message the next run
//! skips (timestamp at or after the checkpoint) is inside that prefix.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

#[derive(Debug, Default)]
struct TrackerState {
    /// Checkpoint being resumed, if any
    seed: Option<DateTime<Utc>>,
    /// First sequence number not yet folded in
    next_seq: u64,
    /// Minimum timestamp over the folded prefix
    watermark: Option<DateTime<Utc>>,
    /// Completed jobs beyond the prefix; `None` for jobs without a timestamp
    pending: BTreeMap<u64, Option<DateTime<Utc>>>,
    /// Minimum over every processed message, prefix or not
    oldest_processed: Option<DateTime<Utc>>,
}

/// Mutex-guarded checkpoint shared by the workers of one full sync
#[derive(Debug, Default)]
pub struct CheckpointTracker {
    inner: Mutex<TrackerState>,
}

fn min_opt(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

impl CheckpointTracker {
    /// Start from the checkpoint of an interrupted run, or from nothing
    pub fn new(seed: Option<DateTime<Utc>>) -> Self {
        Self {
            inner: Mutex::new(TrackerState {
                seed,
                ..Default::default()
            }),
        }
    }

    /// Record job `seq` as done
    ///
    /// `timestamp` is the message's `internal_date` when it was processed and
    /// `None` when it was skipped or had vanished remotely.
    pub fn complete(&self, seq: u64, timestamp: Option<DateTime<Utc>>) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.oldest_processed = min_opt(state.oldest_processed, timestamp);
        state.pending.insert(seq, timestamp);

        loop {
            let next = state.next_seq;
            let Some(ts) = state.pending.remove(&next) else {
                break;
            };
            state.watermark = min_opt(state.watermark, ts);
            state.next_seq += 1;
        }
    }

    /// Value safe to persist as `full_sync_checkpoint`
    pub fn checkpoint(&self) -> Option<DateTime<Utc>> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        min_opt(state.seed, state.watermark)
    }

    /// Oldest timestamp of any message processed this run
    pub fn oldest_processed(&self) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .oldest_processed
    }

    /// Number of jobs in the contiguous completed prefix
    pub fn contiguous(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_seq
    }
}
