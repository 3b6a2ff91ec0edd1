//! Retry policy for transient node failures.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with multiplicative jitter.
///
/// Attempt `n` (zero-based) waits `base * factor^n`, scaled by a random
/// factor in `[1 - jitter, 1 + jitter]`. Intervals are therefore
/// monotonically non-decreasing in expectation.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base: Duration,
    pub factor: f64,
    /// Fractional jitter, e.g. `0.2` for ±20 %.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base: Duration::from_millis(250),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.as_secs_f64() * self.factor.powi(attempt.min(16) as i32);
        let scale = 1.0 + self.jitter * rand::rng().random_range(-1.0..=1.0);
        Duration::from_secs_f64((exp * scale).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_with_attempts() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(0), Duration::from_millis(250));
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let nominal = 250.0 * 2.0_f64.powi(attempt);
            let delay_ms = policy.delay(attempt as u32).as_secs_f64() * 1000.0;
            assert!(delay_ms >= nominal * 0.8 - 1.0);
            assert!(delay_ms <= nominal * 1.2 + 1.0);
        }
    }
}
