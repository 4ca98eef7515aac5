//! Retry manager for handling transient upstream failures with exponential backoff
//!
//! Attempt `k` (1-indexed) that fails with a retryable error waits
//! `min(max_delay, base_delay * 2^(k-1)) + uniform(0, jitter_max)` before the
//! next attempt. After `max_attempts` total attempts the last failure is
//! wrapped in `HttpError::RetryExhausted`. Non-retryable failures are
//! returned as-is after the attempt that produced them.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{HttpError, RetryableError};

/// Decides whether a failed attempt may be retried
pub type RetryPredicate = fn(&HttpError) -> bool;

/// Default predicate: transient classes are retried, caller errors are not
pub fn default_is_retryable(err: &HttpError) -> bool {
    err.is_retryable()
}

/// Immutable retry configuration, created once per client
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, initial attempt included (at least 1)
    pub max_attempts: u32,
    /// Backoff after the first failed attempt
    pub base_delay: Duration,
    /// Cap on the exponential part of the backoff
    pub max_delay: Duration,
    /// Upper bound of the uniform jitter added to each backoff
    pub jitter_max: Duration,
    /// Ceiling on a server-requested Retry-After wait
    pub max_retry_after: Duration,
    /// Retry eligibility of a failure
    pub is_retryable: RetryPredicate,
}

impl RetryPolicy {
    /// Build a policy from configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_max: Duration::from_millis(config.jitter_max_ms),
            max_retry_after: Duration::from_secs(config.max_retry_after_secs),
            is_retryable: default_is_retryable,
        }
    }

    /// Replace the retry predicate
    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.is_retryable = predicate;
        self
    }

    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Retry manager with exponential backoff support
#[derive(Debug, Clone)]
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    /// Create a new RetryManager with the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Create a RetryManager with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RetryPolicy::default())
    }

    /// Execute an async operation with retry logic
    ///
    /// The closure receives the 1-indexed attempt number.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, HttpError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, HttpError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let err = match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };

            if !(self.policy.is_retryable)(&err) {
                debug!(attempt, error = %err, "Non-retryable failure");
                return Err(err);
            }

            if attempt == max_attempts {
                warn!(
                    attempts = attempt,
                    max_attempts,
                    error = %err,
                    "Max retries exhausted"
                );
                return Err(HttpError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt, &err);
            debug!(
                attempt,
                max_attempts,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after transient error"
            );
            tokio::time::sleep(delay).await;
        }

        // max_attempts >= 1, so the loop always returns
        Err(HttpError::Validation("retry loop made no attempts".to_string()))
    }

    /// Exponential part of the backoff for a failed attempt, without jitter
    ///
    /// `min(max_delay, base_delay * 2^(attempt-1))`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.policy.base_delay.checked_mul(factor))
            .map(|delay| delay.min(self.policy.max_delay))
            .unwrap_or(self.policy.max_delay)
    }

    /// Backoff plus uniform jitter in `[0, jitter_max]`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.backoff(attempt) + self.jitter()
    }

    /// Delay before retrying after `err` on `attempt`
    ///
    /// Upstream throttling waits the longest applicable delay: the
    /// computed backoff, `max_delay` and the Retry-After header (capped at
    /// `max_retry_after`). Local
    /// throttling waits at least until the next token refill.
    pub fn delay_for(&self, attempt: u32, err: &HttpError) -> Duration {
        let backoff = self.backoff(attempt);
        let base = match err {
            HttpError::RateLimited { retry_after_secs } => {
                let requested = Duration::from_secs(retry_after_secs.unwrap_or(0));
                let retry_after = requested.min(self.policy.max_retry_after);
                if retry_after < requested {
                    warn!(
                        requested_secs = requested.as_secs(),
                        capped_secs = retry_after.as_secs(),
                        "Retry-After exceeds ceiling, capping wait"
                    );
                }
                backoff.max(self.policy.max_delay).max(retry_after)
            }
            HttpError::RateLimitExceeded(exceeded) => {
                backoff.max(Duration::from_millis(exceeded.next_refill_in_ms))
            }
            _ => backoff,
        };
        base + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.policy.jitter_max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Get the retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}
