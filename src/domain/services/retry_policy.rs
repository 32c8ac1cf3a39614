//! Exponential backoff with proportional jitter.

use std::time::Duration;

use rand::Rng;

/// Fraction of the exponential delay added as random jitter at most.
pub const JITTER_FACTOR: f64 = 0.3;

/// Exponent cap; keeps `base * 2^attempt` from overflowing before the max clamp applies.
const MAX_EXPONENT: u32 = 20;

/// Retry budget and delay curve for network attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry (without jitter).
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Total attempts a key gets before it settles as failed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns true if another attempt is allowed after `attempt` (0-based) failed.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay to wait after the failure of `attempt` (0-based), with random jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let unit: f64 = rand::rng().random();
        self.delay_with_jitter(attempt, unit)
    }

    /// Deterministic variant of [`Self::delay_for`]; `unit` is clamped to `[0, 1]`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let exponential = base_ms.saturating_mul(2_u64.saturating_pow(attempt.min(MAX_EXPONENT)));
        let jitter = (exponential as f64 * JITTER_FACTOR * unit.clamp(0.0, 1.0)) as u64;

        Duration::from_millis(exponential.saturating_add(jitter).min(max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000), Duration::from_millis(10_000))
    }
}
