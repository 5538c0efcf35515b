//! Pipeline configuration loaded from environment variables.

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::CoreError;

/// Tuning knobs for the scheduler, worker pool, and clients.
///
/// All fields have defaults suitable for local development; override via
/// environment variables in production.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of workers, and therefore the cap on in-flight leases.
    pub concurrency_limit: usize,
    /// Maximum execution attempts per job before it is dead-lettered.
    pub max_attempts: i32,
    /// Base delay for the first retry.
    pub base_backoff: Duration,
    /// Upper bound on any retry delay.
    pub max_backoff: Duration,
    /// How long a lease is valid without renewal.
    pub lease_duration: Duration,
    /// Maximum total processing time for one attempt; exceeding it counts
    /// as a transient failure.
    pub max_processing_duration: Duration,
    /// Interval between provider polls (also the cancellation latency bound).
    pub poll_interval: Duration,
    /// Local retry budget for artifact uploads, separate from job attempts.
    pub storage_retry_budget: u32,
    /// Provider-wide cap on concurrent outbound calls.
    pub provider_max_in_flight: usize,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default |
    /// |--------------------------|---------|
    /// | `CONCURRENCY_LIMIT`      | `4`     |
    /// | `MAX_ATTEMPTS`           | `3`     |
    /// | `BASE_BACKOFF_MS`        | `1000`  |
    /// | `MAX_BACKOFF_MS`         | `60000` |
    /// | `LEASE_DURATION_SECS`    | `60`    |
    /// | `MAX_PROCESSING_SECS`    | `600`   |
    /// | `POLL_INTERVAL_MS`       | `1000`  |
    /// | `STORAGE_RETRY_BUDGET`   | `3`     |
    /// | `PROVIDER_MAX_IN_FLIGHT` | `8`     |
    pub fn from_env() -> Self {
        Self {
            concurrency_limit: env_parse("CONCURRENCY_LIMIT", 4),
            max_attempts: env_parse("MAX_ATTEMPTS", 3),
            base_backoff: Duration::from_millis(env_parse("BASE_BACKOFF_MS", 1_000)),
            max_backoff: Duration::from_millis(env_parse("MAX_BACKOFF_MS", 60_000)),
            lease_duration: Duration::from_secs(env_parse("LEASE_DURATION_SECS", 60)),
            max_processing_duration: Duration::from_secs(env_parse("MAX_PROCESSING_SECS", 600)),
            poll_interval: Duration::from_millis(env_parse("POLL_INTERVAL_MS", 1_000)),
            storage_retry_budget: env_parse("STORAGE_RETRY_BUDGET", 3),
            provider_max_in_flight: env_parse("PROVIDER_MAX_IN_FLIGHT", 8),
        }
    }

    /// The backoff policy derived from this configuration.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_backoff, self.max_backoff)
    }

    /// Sanity-check the configuration.
    ///
    /// Leases are renewed once per poll tick, so the poll interval must be
    /// comfortably shorter than the lease duration or every in-flight job
    /// would be reclaimed mid-attempt.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.concurrency_limit == 0 {
            return Err(CoreError::Validation(
                "CONCURRENCY_LIMIT must be at least 1".into(),
            ));
        }
        if self.max_attempts < 1 {
            return Err(CoreError::Validation(
                "MAX_ATTEMPTS must be at least 1".into(),
            ));
        }
        if self.poll_interval * 2 > self.lease_duration {
            return Err(CoreError::Validation(format!(
                "POLL_INTERVAL_MS ({}ms) must be at most half of LEASE_DURATION_SECS ({}s)",
                self.poll_interval.as_millis(),
                self.lease_duration.as_secs()
            )));
        }
        if self.base_backoff > self.max_backoff {
            return Err(CoreError::Validation(
                "BASE_BACKOFF_MS must not exceed MAX_BACKOFF_MS".into(),
            ));
        }
        Ok(())
    }
}

/// Parse an environment variable, falling back to `default` when the
/// variable is unset or unparseable.
fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
