//! Bounded retry with a caller-supplied classification.
//!
//! [`retry_with_policy`] runs an async operation up to
//! `max_retries + 1` times. After each failure it asks `is_retryable`;
//! a `false` stops immediately with [`RetryError::Fatal`], a `true` sleeps
//! for the policy delay and tries again. Running out of attempts yields
//! [`RetryError::Exhausted`] carrying only the last error.
//!
//! The operation receives the 1-based attempt number, so it can do
//! per-attempt work such as refreshing a sequencing token before attempt 2.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;

/// How many times, and how patiently, to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first. Zero means "try once".
    pub max_retries: u32,
    /// Delay before the first retry.
    pub retry_delay: Duration,
    /// Each subsequent delay is the previous one times this. 1 = constant.
    pub backoff_multiplier: u32,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Constant delay between attempts.
    pub fn fixed(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            backoff_multiplier: 1,
            max_delay: retry_delay,
        }
    }

    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
            backoff_multiplier: cfg.backoff_multiplier.max(1),
            max_delay: Duration::from_millis(cfg.max_delay_ms.max(cfg.retry_delay_ms)),
        }
    }

    /// Same delays, different retry count.
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self.clone()
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1 = the first retry).
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = self.backoff_multiplier.max(1).saturating_pow(exponent);
        self.retry_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Why [`retry_with_policy`] gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// `is_retryable` said no.
    Fatal { attempt: u32, error: E },
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    /// Attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempt, .. } => *attempt,
            Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            Self::Fatal { error, .. } => error,
            Self::Exhausted { last_error, .. } => last_error,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal { attempt, error } => {
                write!(f, "fatal error on attempt {}: {}", attempt, error)
            }
            Self::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {} attempts: {}", attempts, last_error),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Runs `operation` under `policy`. On success returns the value and the
/// number of attempts it took.
pub async fn retry_with_policy<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let total = policy.total_attempts();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, attempts = total, "succeeded after retries");
                }
                return Ok((value, attempt));
            }
            Err(error) if !is_retryable(&error) => {
                return Err(RetryError::Fatal { attempt, error });
            }
            Err(error) => {
                if attempt >= total {
                    warn!(attempt, attempts = total, %error, "retry budget exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: error,
                    });
                }
                let delay = policy.delay_before_retry(attempt);
                warn!(
                    attempt,
                    attempts = total,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "retryable failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
