//! Exponential backoff with optional jitter.

use std::time::Duration;
use rand::Rng;

/// Upper bound applied when no explicit cap is configured.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Geometric delay schedule: `initial * factor^attempt`, capped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    initial: Duration,
    factor: f64,
    max_delay: Duration,
    jitter: f64,
}

impl BackoffPolicy {
    /// Create a policy without jitter, capped at [`DEFAULT_MAX_DELAY`].
    pub fn new(initial: Duration, factor: f64) -> Self {
        Self {
            initial,
            factor: factor.max(1.0),
            max_delay: DEFAULT_MAX_DELAY,
            jitter: 0.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Jitter ratio in `[0, 1]`; 0.2 spreads delays by ±20%.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay before retry number `attempt` (0-based). Pure and deterministic.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial.as_millis() as f64;
        let cap_ms = self.max_delay.as_millis() as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = initial_ms * self.factor.powi(exponent);

        // powi overflows to inf for large attempts; min() folds that into the cap
        let capped = if delay_ms.is_finite() { delay_ms.min(cap_ms) } else { cap_ms };
        Duration::from_millis(capped as u64)
    }

    /// [`next_delay`](Self::next_delay) spread by the configured jitter, still capped.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.next_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }

        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let jittered_ms = base.as_millis() as f64 * (1.0 + spread);
        let capped = jittered_ms.max(0.0).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// The full schedule for `attempts` waits, without jitter.
    pub fn schedule(&self, attempts: u32) -> Vec<Duration> {
        (0..attempts).map(|n| self.next_delay(n)).collect()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), 2.0)
    }
}
