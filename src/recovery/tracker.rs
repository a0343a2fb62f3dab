//! Recovery ledger.

use dashmap::DashMap;

use crate::observability::metrics;

/// Caps automatic remediation attempts per failure category.
///
/// Counts only go down through [`reset`](Self::reset) or
/// [`reset_all`](Self::reset_all); success in one category never clears another.
#[derive(Debug)]
pub struct RecoveryTracker {
    max_attempts: u32,
    ledger: DashMap<String, u32>,
}

impl RecoveryTracker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ledger: DashMap::new(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `remediation` if `category` is still under its cap.
    ///
    /// Returns `false` without running it once the cap is reached.
    pub fn attempt_recovery<F>(&self, category: &str, remediation: F) -> bool
    where
        F: FnOnce(),
    {
        let allowed = {
            let mut count = self.ledger.entry(category.to_string()).or_insert(0);
            if *count < self.max_attempts {
                *count += 1;
                true
            } else {
                false
            }
        };

        metrics::record_recovery(category, allowed);
        if allowed {
            remediation();
        }
        allowed
    }

    pub fn attempts(&self, category: &str) -> u32 {
        self.ledger.get(category).map(|c| *c).unwrap_or(0)
    }

    /// Operator action: clear one category.
    pub fn reset(&self, category: &str) {
        self.ledger.remove(category);
    }

    /// Operator action: clear every category.
    pub fn reset_all(&self) {
        self.ledger.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_cap_is_enforced() {
        let tracker = RecoveryTracker::new(3);
        let runs = Cell::new(0);

        for _ in 0..3 {
            assert!(tracker.attempt_recovery("network_error", || runs.set(runs.get() + 1)));
        }
        assert!(!tracker.attempt_recovery("network_error", || runs.set(runs.get() + 1)));
        assert_eq!(runs.get(), 3);
        assert_eq!(tracker.attempts("network_error"), 3);
    }

    #[test]
    fn test_categories_are_independent() {
        let tracker = RecoveryTracker::new(1);
        assert!(tracker.attempt_recovery("memory_leak", || {}));
        assert!(!tracker.attempt_recovery("memory_leak", || {}));
        assert!(tracker.attempt_recovery("network_error", || {}));
        assert_eq!(tracker.attempts("memory_leak"), 1);
    }

    #[test]
    fn test_reset() {
        let tracker = RecoveryTracker::new(1);
        tracker.attempt_recovery("a", || {});
        tracker.attempt_recovery("b", || {});

        tracker.reset("a");
        assert_eq!(tracker.attempts("a"), 0);
        assert_eq!(tracker.attempts("b"), 1);
        assert!(tracker.attempt_recovery("a", || {}));

        tracker.reset_all();
        assert_eq!(tracker.attempts("b"), 0);
    }

    #[test]
    fn test_zero_cap_never_runs() {
        let tracker = RecoveryTracker::new(0);
        assert!(!tracker.attempt_recovery("anything", || panic!("must not run")));
    }
}
