//! Bounded retry with exponential backoff

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::debug;

use crate::error::{Result, ZenError};

/// Backoff schedule for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling for computed delays, before jitter
    pub max_delay: Duration,
    /// Longest `Retry-After` we are willing to sleep through
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Default schedule with `max_retries` retries
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self::with_max_retries(0)
    }

    /// Doubling delays from `base_delay` capped at `max_delay`, each
    /// stretched by up to its own length of jitter
    #[must_use]
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_jitter()
            .with_max_times(usize::try_from(self.max_retries).unwrap_or(usize::MAX))
    }
}

/// Failure of a single attempt
#[derive(Debug, Clone)]
pub struct AttemptError {
    /// What went wrong
    pub error: ZenError,
    /// Another attempt might succeed
    pub retryable: bool,
    /// Provider-mandated wait before the next attempt
    pub retry_after: Option<Duration>,
}

impl AttemptError {
    /// Failure worth retrying
    #[must_use]
    pub fn transient(error: ZenError) -> Self {
        Self {
            error,
            retryable: true,
            retry_after: None,
        }
    }

    /// Failure that ends the operation
    #[must_use]
    pub fn permanent(error: ZenError) -> Self {
        Self {
            error,
            retryable: false,
            retry_after: None,
        }
    }

    /// Attach a `Retry-After` hint
    #[must_use]
    pub fn with_retry_after(mut self, after: Option<Duration>) -> Self {
        self.retry_after = after;
        self
    }
}

impl From<ZenError> for AttemptError {
    fn from(error: ZenError) -> Self {
        if error.is_network_class() {
            Self::transient(error)
        } else {
            Self::permanent(error)
        }
    }
}

/// Run `attempt` until it succeeds, fails permanently, or retries run out
///
/// `attempt` receives the 1-based attempt number. A `Retry-After` hint
/// replaces the computed delay; one longer than `max_retry_after` ends
/// the operation.
///
/// # Errors
///
/// The error of the last attempt.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut attempt: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    let mut attempts = 0_u32;
    let operation = || {
        attempts += 1;
        attempt(attempts)
    };
    let max_retry_after = policy.max_retry_after;

    operation
        .retry(policy.backoff())
        .sleep(tokio::time::sleep)
        .when(|failure: &AttemptError| failure.retryable)
        .adjust(|failure: &AttemptError, planned: Option<Duration>| {
            let planned = planned?;
            match failure.retry_after {
                Some(after) if after > max_retry_after => {
                    debug!(label, wait_secs = after.as_secs(), "retry-after too long; giving up");
                    None
                }
                Some(after) => Some(after),
                None => Some(planned),
            }
        })
        .notify(|failure: &AttemptError, wait: Duration| {
            debug!(
                label,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                error = %failure.error,
                "retrying"
            );
        })
        .await
        .map_err(|failure| failure.error)
}
