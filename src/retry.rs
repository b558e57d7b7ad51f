//! Bounded-backoff retry for the invocation path.
//!
//! Construction never retries; only remote calls do, and only on errors the
//! taxonomy marks transient. The executor doubles the delay after each
//! failed attempt up to a cap, and gives up immediately when an error is
//! permanent (auth rejection, invalid request, configuration).

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::LlmError;

/// Backoff policy for retried invocations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (so 3 means up to 2 retries).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the doubled delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that disables retries entirely.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Executes operations under a [`RetryPolicy`].
#[derive(Debug, Default)]
pub struct RetryExecutor;

impl RetryExecutor {
    /// Run `operation`, retrying transient failures with exponential backoff.
    ///
    /// Returns the first success, the first permanent error, or the last
    /// transient error once attempts are exhausted.
    pub async fn execute<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut delay = policy.base_delay;

        for attempt in 1..=max_attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => {
                    debug!(error = %e, "permanent error, not retrying");
                    return Err(e);
                }
                Err(e) if attempt == max_attempts => {
                    warn!(attempt, error = %e, "giving up after final attempt");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(policy.max_delay);
                }
            }
        }

        unreachable!("retry loop returns on the final attempt")
    }
}
