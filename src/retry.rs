//! Retry/backoff policy for the write path
//!
//! Network-sensitive store operations tolerate transient connectivity
//! failure: bounded attempts with exponential backoff. Terminal errors
//! stop immediately and never burn retry budget.

use crate::config::{MAX_RETRY_ATTEMPTS, RETRY_BASE_DELAY_MS};
use crate::error::StoreError;
use std::future::Future;
use std::time::Duration;

/// Bounded exponential-backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after that.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Run `attempt_fn` until it succeeds, fails terminally, or the attempt
    /// budget is exhausted. The last error is surfaced as-is.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut delay = self.base_delay;

        for attempt in 1..=max_attempts {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient store failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::warn!(
                            operation,
                            attempts = max_attempts,
                            error = %err,
                            "retry budget exhausted"
                        );
                    }
                    return Err(err);
                }
            }
        }

        unreachable!("retry loop returns from its final attempt")
    }
}
