//! Retry policy and the deterministic exponential backoff it produces.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Default first backoff interval for mutations.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
/// Default backoff growth factor for mutations.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Default backoff ceiling.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(30);
/// Default overall budget for one retried operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// First backoff interval for post-mutation confirmation reads.
pub const READ_AFTER_WRITE_INITIAL_INTERVAL: Duration = Duration::from_secs(2);
/// Backoff growth factor for post-mutation confirmation reads.
pub const READ_AFTER_WRITE_MULTIPLIER: f64 = 1.5;
/// Retries allowed after the first confirmation read.
pub const READ_AFTER_WRITE_MAX_RETRIES: u32 = 30;

/// A [`RetryPolicy`] could not be built from the supplied values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("backoff multiplier must be a finite number >= 1, got {0}")]
    InvalidMultiplier(f64),

    #[error("max interval {max:?} is shorter than initial interval {initial:?}")]
    CeilingBelowInitial { initial: Duration, max: Duration },
}

/// Spacing of retry attempts and the overall deadline of one retried operation.
///
/// Invariants (enforced by [`RetryPolicy::new`]):
/// - `backoff_multiplier` is finite and `>= 1`.
/// - `max_interval >= initial_interval`.
///
/// A policy built by [`RetryPolicy::new`] retries until its deadline; cap the
/// number of retries with [`RetryPolicy::with_max_retries`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetryPolicy {
    initial_interval: Duration,
    backoff_multiplier: f64,
    max_interval: Duration,
    operation_timeout: Duration,
    max_retries: Option<u32>,
}

impl RetryPolicy {
    /// Creates a validated policy.
    pub fn new(
        initial_interval: Duration,
        backoff_multiplier: f64,
        max_interval: Duration,
        operation_timeout: Duration,
    ) -> Result<Self, PolicyError> {
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier(backoff_multiplier));
        }
        if max_interval < initial_interval {
            return Err(PolicyError::CeilingBelowInitial {
                initial: initial_interval,
                max: max_interval,
            });
        }
        Ok(Self {
            initial_interval,
            backoff_multiplier,
            max_interval,
            operation_timeout,
            max_retries: None,
        })
    }

    /// Policy for confirmation reads after a create or update: 2 s initial
    /// interval growing by 1.5x up to 30 s, at most 30 retries.
    pub fn read_after_write() -> Self {
        Self {
            initial_interval: READ_AFTER_WRITE_INITIAL_INTERVAL,
            backoff_multiplier: READ_AFTER_WRITE_MULTIPLIER,
            max_interval: DEFAULT_MAX_INTERVAL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            max_retries: Some(READ_AFTER_WRITE_MAX_RETRIES),
        }
    }

    /// Returns a copy of this policy with a different overall budget.
    #[must_use]
    pub fn with_operation_timeout(self, operation_timeout: Duration) -> Self {
        Self {
            operation_timeout,
            ..self
        }
    }

    /// Returns a copy of this policy that stops after `max_retries` retries,
    /// i.e. `max_retries + 1` attempts, even if time remains.
    #[must_use]
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..self
        }
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Delay to wait after attempt `attempt` (zero-based) fails.
    ///
    /// Attempt 0 yields `initial_interval`; attempt `n` yields
    /// `initial_interval * multiplier^n`, clamped to `max_interval`. No jitter
    /// is applied, so the result depends only on `attempt` and the policy.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_interval;
        }

        let ceiling_nanos = self.max_interval.as_nanos().min(u64::MAX as u128) as u64;
        let scaled =
            self.initial_interval.as_nanos() as f64 * self.backoff_multiplier.powf(attempt as f64);

        if !scaled.is_finite() || scaled >= ceiling_nanos as f64 {
            return Duration::from_nanos(ceiling_nanos);
        }
        Duration::from_nanos(scaled as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_interval: DEFAULT_MAX_INTERVAL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            max_retries: None,
        }
    }
}
