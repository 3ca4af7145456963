//! Retry with exponential backoff for transient network and service failures.
//!
//! The wrapper is a plain higher-order async function so each call site gets an
//! independent retry budget. Errors that carry a permanent [`PipelineError`]
//! anywhere in their chain are returned immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::{PipelineError, Result};

/// Retry ceiling and backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Delay after the `failures`-th failed attempt (1-based):
    /// `min(base_delay * 2^(failures - 1), max_delay)`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        1u32.checked_shl(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Total time spent sleeping when an operation fails `failures` times
    /// and then succeeds.
    pub fn total_delay(&self, failures: u32) -> Duration {
        (1..=failures.min(self.max_retries))
            .map(|n| self.delay_for(n))
            .sum()
    }
}

/// Check whether any error in the chain is known to be permanent
pub fn is_permanent(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<PipelineError>())
        .any(PipelineError::is_permanent)
}

/// Run `operation` until it succeeds, a permanent error occurs, or the retry
/// budget of `policy` is used up.
///
/// After exhaustion the last error is returned wrapped in
/// [`PipelineError::RetriesExhausted`].
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if failures > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = failures + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                failures += 1;

                if is_permanent(&err) {
                    tracing::warn!(
                        operation = operation_name,
                        attempt = failures,
                        error = %format!("{err:#}"),
                        "Permanent failure, not retrying"
                    );
                    return Err(err);
                }

                if failures > policy.max_retries {
                    tracing::error!(
                        operation = operation_name,
                        max_retries = policy.max_retries,
                        error = %format!("{err:#}"),
                        "Giving up after exhausting retries"
                    );
                    return Err(PipelineError::RetriesExhausted {
                        operation: operation_name.to_string(),
                        attempts: failures,
                        source: err.into(),
                    }
                    .into());
                }

                let delay = policy.delay_for(failures);
                tracing::warn!(
                    operation = operation_name,
                    attempt = failures,
                    max_retries = policy.max_retries,
                    delay_secs = delay.as_secs_f64(),
                    error = %format!("{err:#}"),
                    "Operation failed, retrying"
                );

                sleep(delay).await;
            }
        }
    }
}
