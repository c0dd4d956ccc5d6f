//! Retry with jittered exponential backoff.
//!
//! Only idempotent reads go through the executor; writes are never retried.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_RETRY_FACTOR, DEFAULT_RETRY_MAX_DELAY, DEFAULT_RETRY_MIN_DELAY, DEFAULT_TIER_RETRIES,
};

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempt budget. An always-failing operation is called exactly this many
    /// times (minimum 1).
    pub retries: u32,
    /// Delay before the second attempt, before jitter.
    pub min_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub factor: f64,
    /// Multiply each delay by a uniform factor in `[1, 2)`.
    pub randomize: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_TIER_RETRIES,
            min_delay: DEFAULT_RETRY_MIN_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
            factor: DEFAULT_RETRY_FACTOR,
            randomize: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting between attempts. Useful for tests and in-process tiers.
    pub fn immediate(retries: u32) -> Self {
        Self {
            retries,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
            randomize: false,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut secs = self.min_delay.as_secs_f64() * self.factor.powi(exponent);
        if self.randomize {
            secs *= rand::thread_rng().gen_range(1.0..2.0);
        }
        let secs = secs.min(self.max_delay.as_secs_f64());
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

/// Result of running an operation under a [`RetryExecutor`]. Never an `Err`: the caller
/// decides what exhaustion means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    Success { value: T, attempts: u32 },
    ExhaustedRetries { last_error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    #[inline]
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. }
            | RetryOutcome::ExhaustedRetries { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::ExhaustedRetries { last_error, .. } => Err(last_error),
        }
    }
}

/// Details passed to the failure observer after each failed attempt.
#[derive(Debug)]
pub struct FailedAttempt<'a, E> {
    pub attempt_number: u32,
    pub retries_left: u32,
    pub error: &'a E,
}

/// Observer invoked once per failed attempt. It cannot change control flow.
pub type FailedAttemptHook<'h, E> = &'h (dyn Fn(&FailedAttempt<'_, E>) + Send + Sync);

/// Runs fallible async operations with retries.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` with the policy's attempt budget.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: F,
        on_failed_attempt: Option<FailedAttemptHook<'_, E>>,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(self.policy.retries, operation, on_failed_attempt)
            .await
    }

    /// Runs `operation` with an explicit attempt budget.
    pub async fn execute_with<F, Fut, T, E>(
        &self,
        retries: u32,
        mut operation: F,
        on_failed_attempt: Option<FailedAttemptHook<'_, E>>,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let budget = retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match operation().await {
                Ok(value) => {
                    return RetryOutcome::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Err(e) => e,
            };

            let retries_left = budget - attempt;
            if let Some(hook) = on_failed_attempt {
                let failed = FailedAttempt {
                    attempt_number: attempt,
                    retries_left,
                    error: &error,
                };
                if catch_unwind(AssertUnwindSafe(|| hook(&failed))).is_err() {
                    warn!(attempt, "on_failed_attempt hook panicked; continuing retries");
                }
            }

            if retries_left == 0 {
                return RetryOutcome::ExhaustedRetries {
                    last_error: error,
                    attempts: attempt,
                };
            }

            let delay = self.policy.delay_for_attempt(attempt);
            debug!(attempt, retries_left, delay_ms = delay.as_millis() as u64, "retrying");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
