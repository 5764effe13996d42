//! Exponential backoff around transient failures.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::types::ResponseEnvelope;

use super::{CallContext, Middleware, Next};

/// Re-enters the rest of the chain when it fails with a transient error
/// (rate limit, transport failure or timeout).
///
/// Before retry `n` (1-based) it waits `min(base_delay * 2^(n-1), max_delay)`,
/// or the provider's `retry_after` hint when that is longer. The wait never
/// exceeds `max_delay`. Once `max_retries` retries are used up the last error
/// is returned unchanged.
/// Every other error kind passes through on the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryMiddleware {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryMiddleware {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(16),
        }
    }
}

impl RetryMiddleware {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Backoff before the `retry`-th retry (1-based).
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use llm_relay::middleware::RetryMiddleware;
    ///
    /// let retry = RetryMiddleware::default();
    /// assert_eq!(retry.delay_for(1), Duration::from_secs(2));
    /// assert_eq!(retry.delay_for(3), Duration::from_secs(8));
    /// assert_eq!(retry.delay_for(5), Duration::from_secs(16));
    /// ```
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff before the `retry`-th retry of a call that failed with `err`.
    /// A longer `retry_after` hint replaces the computed delay, up to
    /// `max_delay`.
    pub fn delay_after(&self, retry: u32, err: &ClientError) -> Duration {
        let computed = self.delay_for(retry);
        match err {
            ClientError::RateLimit {
                retry_after: Some(suggested),
                ..
            } => computed.max(*suggested).min(self.max_delay),
            _ => computed,
        }
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    async fn call(
        &self,
        ctx: &CallContext,
        next: Next<'_>,
    ) -> Result<ResponseEnvelope, ClientError> {
        let mut retries = 0;
        loop {
            match next.run().await {
                Ok(response) => {
                    if retries > 0 {
                        debug!(
                            operation = %ctx.operation,
                            provider = %ctx.provider,
                            retries,
                            "call succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(err) if err.is_transient() && retries < self.max_retries => {
                    retries += 1;
                    let delay = self.delay_after(retries, &err);
                    warn!(
                        operation = %ctx.operation,
                        provider = %ctx.provider,
                        model = %ctx.model,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
