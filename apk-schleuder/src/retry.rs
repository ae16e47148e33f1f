use std::time::Duration;

use rand::Rng;

/// Longest pause between two attempts against the same host.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// How often and how patiently a flaky remote is retried.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (zero-based).
    ///
    /// Doubles per retry up to [`MAX_DELAY`], then scaled by a random factor
    /// in `[0.5, 1.5]`.
    pub fn delay(&self, retry: u32) -> Duration {
        let nominal = self
            .base
            .max(Duration::from_millis(1))
            .saturating_mul(2u32.saturating_pow(retry))
            .min(MAX_DELAY);
        let factor = rand::rng().random_range(0.5..=1.5);
        nominal.mul_f64(factor).max(Duration::from_millis(1))
    }
}
