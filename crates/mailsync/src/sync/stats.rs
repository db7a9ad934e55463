//! Per-run sync statistics

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which path a sync call took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// History walk from the stored cursor
    Incremental,
    /// Complete listing pass with no checkpoint
    Full,
    /// Listing pass skipping messages newer than the stored checkpoint
    FullResume,
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStrategy::Incremental => f.write_str("incremental"),
            SyncStrategy::Full => f.write_str("full"),
            SyncStrategy::FullResume => f.write_str("full_resume"),
        }
    }
}

/// Whether every message made it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    #[default]
    Completed,
    /// Some messages failed; progress was kept for the next run
    Partial,
}

/// Statistics from one `SyncEngine::sync` call
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub strategy: SyncStrategy,
    /// An incremental attempt failed and a full sync ran instead
    pub fell_back: bool,
    /// Messages fetched and stored
    pub messages_processed: usize,
    /// Messages that could not be synced this run
    pub messages_failed: usize,
    /// Messages skipped by the resume filter, duplicates, or deleted remotely
    pub messages_skipped: usize,
    pub outcome: SyncOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Failures of an incremental attempt the fallback pass went over again
    #[serde(skip)]
    superseded_failures: usize,
}

impl SyncStats {
    pub fn new(strategy: SyncStrategy) -> Self {
        Self {
            strategy,
            fell_back: false,
            messages_processed: 0,
            messages_failed: 0,
            messages_skipped: 0,
            outcome: SyncOutcome::Completed,
            started_at: Utc::now(),
            duration_ms: 0,
            superseded_failures: 0,
        }
    }

    /// Start a full sync that replaces a failed incremental attempt
    pub(crate) fn fallback_from(incremental: &SyncStats) -> Self {
        let mut stats = Self::new(SyncStrategy::Full);
        stats.fell_back = true;
        stats.started_at = incremental.started_at;
        stats.messages_processed = incremental.messages_processed;
        stats.messages_failed = incremental.messages_failed;
        stats.superseded_failures = incremental.messages_failed;
        stats.messages_skipped = incremental.messages_skipped;
        stats
    }

    /// Stamp the duration and derive the outcome from the final pass
    pub(crate) fn finish(mut self) -> Self {
        let elapsed = Utc::now() - self.started_at;
        self.duration_ms = elapsed.num_milliseconds().max(0) as u64;
        if self.messages_failed > self.superseded_failures {
            self.outcome = SyncOutcome::Partial;
        }
        self
    }

    pub fn is_partial(&self) -> bool {
        self.outcome == SyncOutcome::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_marks_partial_on_failures() {
        let mut stats = SyncStats::new(SyncStrategy::Incremental);
        stats.messages_processed = 3;
        assert_eq!(stats.clone().finish().outcome, SyncOutcome::Completed);

        stats.messages_failed = 1;
        assert!(stats.finish().is_partial());
    }

    #[test]
    fn test_fallback_carries_counts() {
        let mut incremental = SyncStats::new(SyncStrategy::Incremental);
        incremental.messages_processed = 2;
        incremental.messages_skipped = 1;

        let stats = SyncStats::fallback_from(&incremental);
        assert_eq!(stats.strategy, SyncStrategy::Full);
        assert!(stats.fell_back);
        assert_eq!(stats.messages_processed, 2);
        assert_eq!(stats.messages_skipped, 1);
        assert_eq!(stats.started_at, incremental.started_at);
    }

    #[test]
    fn test_fallback_outcome_ignores_superseded_failures() {
        let mut incremental = SyncStats::new(SyncStrategy::Incremental);
        incremental.messages_failed = 1;

        let stats = SyncStats::fallback_from(&incremental);
        assert_eq!(stats.messages_failed, 1);
        assert_eq!(stats.clone().finish().outcome, SyncOutcome::Completed);

        let mut stats = stats;
        stats.messages_failed += 1;
        assert!(stats.finish().is_partial());
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(SyncStrategy::FullResume.to_string(), "full_resume");
    }
}
