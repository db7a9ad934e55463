//! Cancellation scope shared by everything one sync call does

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Deadline plus explicit cancel flag
///
/// Every HTTP request clamps its timeout to the time left in the scope, so
/// no blocking call outlives the sync that issued it.
#[derive(Debug)]
pub struct CancelScope {
    deadline: Instant,
    cancelled: AtomicBool,
}

impl CancelScope {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Stop the operation early
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || Instant::now() >= self.deadline
    }

    /// Time left before the deadline, `None` once cancelled or expired
    pub fn remaining(&self) -> Option<Duration> {
        if self.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        let left = self.deadline.saturating_duration_since(Instant::now());
        (!left.is_zero()).then_some(left)
    }

    /// `limit` capped to the time left, `None` once the scope is done
    pub fn clamp(&self, limit: Duration) -> Option<Duration> {
        self.remaining().map(|left| left.min(limit))
    }

    /// Sleep for `duration` or until the scope ends; false if it ended
    pub fn sleep(&self, duration: Duration) -> bool {
        match self.clamp(duration) {
            Some(d) => {
                std::thread::sleep(d);
                !self.is_cancelled()
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag() {
        let scope = CancelScope::with_timeout(Duration::from_secs(60));
        assert!(!scope.is_cancelled());
        assert!(scope.remaining().is_some());

        scope.cancel();
        assert!(scope.is_cancelled());
        assert_eq!(scope.remaining(), None);
        assert_eq!(scope.clamp(Duration::from_secs(1)), None);
    }

    #[test]
    fn test_deadline_expiry() {
        let scope = CancelScope::with_timeout(Duration::ZERO);
        assert!(scope.is_cancelled());
        assert!(!scope.sleep(Duration::from_millis(10)));
    }

    #[test]
    fn test_clamp_caps_to_limit() {
        let scope = CancelScope::with_timeout(Duration::from_secs(600));
        assert_eq!(
            scope.clamp(Duration::from_secs(30)),
            Some(Duration::from_secs(30))
        );
    }
}
