//! Probabilistic sampler for non-error telemetry.
//!
//! The rate lives in an atomic so a config reload can change it while
//! producers keep recording.

use std::sync::atomic::{AtomicU64, Ordering};

/// Keeps a record with probability `rate`.
#[derive(Debug)]
pub struct Sampler {
    rate_bits: AtomicU64,
}

impl Sampler {
    /// Rates outside `[0, 1]` are clamped.
    pub fn new(rate: f64) -> Self {
        Self {
            rate_bits: AtomicU64::new(clamp(rate).to_bits()),
        }
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    pub fn set_rate(&self, rate: f64) {
        self.rate_bits.store(clamp(rate).to_bits(), Ordering::Relaxed);
    }

    /// Roll the dice for one record.
    pub fn keep(&self) -> bool {
        let rate = self.rate();
        if rate >= 1.0 {
            true
        } else if rate <= 0.0 {
            false
        } else {
            fastrand::f64() < rate
        }
    }
}

fn clamp(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extremes() {
        let all = Sampler::new(1.0);
        let none = Sampler::new(0.0);
        for _ in 0..1000 {
            assert!(all.keep());
            assert!(!none.keep());
        }
    }

    #[test]
    fn test_rate_is_clamped_and_live() {
        let sampler = Sampler::new(4.0);
        assert_eq!(sampler.rate(), 1.0);
        sampler.set_rate(-1.0);
        assert_eq!(sampler.rate(), 0.0);
        sampler.set_rate(f64::NAN);
        assert_eq!(sampler.rate(), 0.0);
    }

    #[test]
    fn test_rate_roughly_respected() {
        let sampler = Sampler::new(0.5);
        let kept = (0..10_000).filter(|_| sampler.keep()).count();
        assert!((4_000..6_000).contains(&kept), "kept {}", kept);
    }
}
