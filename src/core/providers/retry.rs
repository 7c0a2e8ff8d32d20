//! Retry policy with exponential backoff

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::core::error::{GatewayError, Result};
use crate::core::types::RequestContext;

/// Exponential backoff retry policy
///
/// Delays start at `base_delay` and double up to `max_delay`. An
/// upstream-provided `retry_after` overrides the computed delay. Timeouts
/// are retried at most once regardless of `max_retries`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Backoff delay before retry attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor as u32)
            .min(self.max_delay)
    }

    /// Run `operation` with retries.
    ///
    /// Retries only kinds classified retryable by the error taxonomy.
    /// Cancellation interrupts a pending backoff sleep and is returned as
    /// [`GatewayError::Cancelled`], never swallowed.
    pub async fn execute<T, F, Fut>(
        &self,
        provider: &str,
        ctx: &RequestContext,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut timeout_retried = false;
        let mut attempt = 0u32;

        loop {
            if ctx.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            attempt += 1;
            let timed_out = matches!(err, GatewayError::Timeout { .. });
            let exhausted = attempt > self.max_retries
                || !err.is_retryable()
                || (timed_out && timeout_retried);
            if exhausted {
                return Err(err);
            }
            if timed_out {
                timeout_retried = true;
            }

            let delay = err
                .retry_delay()
                .map(Duration::from_secs)
                .unwrap_or_else(|| self.delay_for(attempt))
                .min(self.max_delay);
            warn!(
                provider,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying provider call"
            );

            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(GatewayError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
