//! Retry policy for pool selection and mover start.
//!
//! A [`RetryPolicy`] is an immutable value shared by every transfer a door
//! drives. It bounds how often ([`RetryPolicy::retry_count`]) and for how long
//! ([`RetryPolicy::total_timeout`]) a failed attempt may be repeated, and how
//! long a single mover start may take ([`RetryPolicy::mover_start_timeout`]).
//!
//! # Overview
//!
//! When an attempt fails, the error is classified into a [`FailureType`]
//! and handed to [`RetryPolicy::should_retry`], which answers with a
//! [`RetryDecision`]. [`run_with_retry`] wires both into a loop.
//!
//! The loop is rate limited: two consecutive attempts start at least
//! `retry_period` apart. Stale pool selections are retried at once.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use transfer_door::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::never_fail();
//! let decision = policy.should_retry(
//!     FailureType::Transient,
//!     1,
//!     Duration::from_millis(100),
//!     Duration::from_millis(100),
//! );
//! assert_eq!(
//!     decision,
//!     RetryDecision::Retry { delay: Duration::from_millis(400), attempt: 2 }
//! );
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::error::{FailureType, TransferError, classify_error};

/// Per-attempt mover start timeout used by every preset (500ms).
pub const DEFAULT_MOVER_START_TIMEOUT: Duration = Duration::from_millis(500);

/// Retry period of the never-fail preset (500ms).
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_millis(500);

/// Retry count meaning "no limit".
pub const UNBOUNDED_RETRIES: u32 = u32::MAX;

/// Total timeout meaning "no deadline".
pub const UNBOUNDED_TIMEOUT: Duration = Duration::MAX;

/// Maximum jitter added to exponential delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// How the delay between two attempts is computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Consecutive attempts start `retry_period` apart.
    Fixed,

    /// `min(base * multiplier^(attempt-1), max) + jitter`.
    Exponential {
        /// Delay before the first retry.
        base: Duration,
        /// Delay cap.
        max: Duration,
        /// Growth factor per attempt.
        multiplier: f32,
    },
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Bounds on repeated pool-selection and mover-start attempts.
///
/// # Presets
///
/// | Preset | `retry_count` | `retry_period` | `total_timeout` |
/// |--------|---------------|----------------|-----------------|
/// | [`never_fail`](Self::never_fail) | unbounded | 500ms | unbounded |
/// | [`try_once`](Self::try_once) | 1 | 0 | caller supplied |
/// | [`try_until_timeout`](Self::try_until_timeout) | unbounded | 500ms | caller supplied |
///
/// All presets use a 500ms mover start timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    retry_count: u32,

    /// Minimum separation between the starts of two attempts.
    retry_period: Duration,

    /// Wall-clock budget across all attempts.
    total_timeout: Duration,

    /// Budget for a single mover start.
    mover_start_timeout: Duration,

    backoff: Backoff,
}

impl RetryPolicy {
    /// Creates a policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `retry_count` - Maximum attempts including the initial one (clamped to >= 1)
    /// * `retry_period` - Minimum separation between two attempts
    /// * `total_timeout` - Budget across all attempts
    /// * `mover_start_timeout` - Budget for one mover start
    #[must_use]
    pub fn new(
        retry_count: u32,
        retry_period: Duration,
        total_timeout: Duration,
        mover_start_timeout: Duration,
    ) -> Self {
        Self {
            retry_count: retry_count.max(1),
            retry_period,
            total_timeout,
            mover_start_timeout,
            backoff: Backoff::Fixed,
        }
    }

    /// Retries recoverable failures forever, 500ms apart.
    #[must_use]
    pub fn never_fail() -> Self {
        Self::new(
            UNBOUNDED_RETRIES,
            DEFAULT_RETRY_PERIOD,
            UNBOUNDED_TIMEOUT,
            DEFAULT_MOVER_START_TIMEOUT,
        )
    }

    /// A single attempt bounded by `total_timeout`.
    #[must_use]
    pub fn try_once(total_timeout: Duration) -> Self {
        Self::new(
            1,
            Duration::ZERO,
            total_timeout,
            DEFAULT_MOVER_START_TIMEOUT,
        )
    }

    /// Retries recoverable failures until `total_timeout` has passed.
    #[must_use]
    pub fn try_until_timeout(total_timeout: Duration) -> Self {
        Self::new(
            UNBOUNDED_RETRIES,
            DEFAULT_RETRY_PERIOD,
            total_timeout,
            DEFAULT_MOVER_START_TIMEOUT,
        )
    }

    /// Replaces the fixed retry period with the given backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Maximum number of attempts; [`UNBOUNDED_RETRIES`] means no limit.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Minimum separation between the starts of two attempts.
    #[must_use]
    pub fn retry_period(&self) -> Duration {
        self.retry_period
    }

    /// Budget across all attempts; [`UNBOUNDED_TIMEOUT`] means no deadline.
    #[must_use]
    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }

    /// Budget for a single mover start.
    #[must_use]
    pub fn mover_start_timeout(&self) -> Duration {
        self.mover_start_timeout
    }

    /// The configured backoff.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempts_made` - Attempts made so far, including the failed one
    /// * `elapsed` - Time since the first attempt started
    /// * `since_last_attempt` - Time since the failed attempt started
    #[instrument(skip(self), fields(retry_count = self.retry_count))]
    pub fn should_retry(
        &self,
        failure_type: FailureType,
        attempts_made: u32,
        elapsed: Duration,
        since_last_attempt: Duration,
    ) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::IllegalState => {
                return RetryDecision::DoNotRetry {
                    reason: "operations called out of order".to_string(),
                };
            }
            FailureType::Interrupted => {
                return RetryDecision::DoNotRetry {
                    reason: "interrupted".to_string(),
                };
            }
            FailureType::Transient | FailureType::Stale => {}
        }

        if attempts_made >= self.retry_count {
            debug!(attempts_made, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.retry_count),
            };
        }

        let delay = if failure_type == FailureType::Stale {
            Duration::ZERO
        } else {
            self.calculate_delay(attempts_made, since_last_attempt)
        };

        if self.total_timeout.saturating_sub(elapsed) <= delay {
            debug!(
                elapsed_ms = elapsed.as_millis(),
                delay_ms = delay.as_millis(),
                "deadline reached"
            );
            return RetryDecision::DoNotRetry {
                reason: format!(
                    "total timeout ({}ms) reached",
                    self.total_timeout.as_millis()
                ),
            };
        }

        debug!(
            next_attempt = attempts_made + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempts_made + 1,
        }
    }

    fn calculate_delay(&self, attempts_made: u32, since_last_attempt: Duration) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.retry_period.saturating_sub(since_last_attempt),
            Backoff::Exponential {
                base,
                max,
                multiplier,
            } => {
                let base_ms = base.as_millis() as f64;
                let exponent = f64::from(attempts_made.saturating_sub(1));
                let delay_ms = base_ms * f64::from(multiplier).powf(exponent);
                let capped_ms = delay_ms.min(max.as_millis() as f64);

                Duration::from_millis(capped_ms as u64) + calculate_jitter()
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::never_fail()
    }
}

/// Random jitter between 0 and 500ms.
fn calculate_jitter() -> Duration {
    let mut rng = rand::thread_rng();
    let max_ms = u64::try_from(MAX_JITTER.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rng.gen_range(0..=max_ms))
}

/// Counters of a finished retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryStats {
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Attempts made after a failure.
    pub retries: u32,
}

/// Runs `attempt` until it succeeds or `policy` says stop.
///
/// The closure receives the 1-indexed attempt number and the remaining
/// budget of the whole loop. Uses [`classify_error`] to decide retries.
///
/// # Errors
///
/// Returns the error of the last attempt together with the loop counters.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    attempt: F,
) -> Result<(T, RetryStats), (TransferError, RetryStats)>
where
    F: FnMut(u32, Duration) -> Fut,
    Fut: Future<Output = Result<T, TransferError>>,
{
    run_with_retry_classified(policy, classify_error, |_, _| {}, attempt).await
}

/// Like [`run_with_retry`] with a caller supplied classifier.
///
/// `before_sleep` is called with the failure and the delay before every retry.
///
/// # Errors
///
/// Returns the error of the last attempt together with the loop counters.
pub async fn run_with_retry_classified<T, C, S, F, Fut>(
    policy: &RetryPolicy,
    classify: C,
    mut before_sleep: S,
    mut attempt: F,
) -> Result<(T, RetryStats), (TransferError, RetryStats)>
where
    C: Fn(&TransferError) -> FailureType,
    S: FnMut(&TransferError, Duration),
    F: FnMut(u32, Duration) -> Fut,
    Fut: Future<Output = Result<T, TransferError>>,
{
    let started = Instant::now();
    let mut stats = RetryStats::default();

    loop {
        stats.attempts += 1;
        let attempt_started = Instant::now();
        let remaining = policy.total_timeout().saturating_sub(started.elapsed());
        debug!(attempt = stats.attempts, "attempting");

        let error = match attempt(stats.attempts, remaining).await {
            Ok(value) => return Ok((value, stats)),
            Err(error) => error,
        };

        match policy.should_retry(
            classify(&error),
            stats.attempts,
            started.elapsed(),
            attempt_started.elapsed(),
        ) {
            RetryDecision::Retry { delay, attempt } => {
                info!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying"
                );
                before_sleep(&error, delay);
                stats.retries += 1;
                tokio::time::sleep(delay).await;
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(attempts = stats.attempts, reason, "giving up");
                return Err((error, stats));
            }
        }
    }
}
