//! Retry backoff policy: exponential with jitter.

use std::time::Duration;

use rand::Rng;

/// Fraction of the computed delay used as the jitter band (+/- 20%).
const JITTER_FRACTION: f64 = 0.2;

/// Exponential backoff policy with a cap and random jitter.
///
/// The delay for attempt `n` (1-based) is `base * 2^(n-1)`, capped at
/// `max`, then jittered by up to +/- 20% so that a burst of failed jobs
/// does not retry in lockstep. The jittered delay is clamped back into
/// `[base, max]`: a retry never fires sooner than `base` after the
/// failure and never waits longer than `max`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before re-enqueueing after the given (1-based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let raw = self
            .base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max);

        let jitter = rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
        let jittered = Duration::from_secs_f64(raw.as_secs_f64() * (1.0 + jitter));
        jittered.min(self.max).max(self.base)
    }
}
