use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::{error::Result, rate_limit::RateLimiter, redact::redact};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);
const MAX_JITTER_RATIO: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (zero based). A server hint wins outright and is not capped.
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint;
        }
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let jitter = exponential.mul_f64(rand::thread_rng().gen_range(0.0..MAX_JITTER_RATIO));
        exponential.saturating_add(jitter).min(self.max_delay)
    }

    /// Runs `call` until it succeeds, fails fatally, or the attempt budget is
    /// spent. Each attempt holds a rate-limit permit only while it runs; the
    /// backoff sleep in between does not occupy a slot.
    pub async fn run<T, F, Fut>(&self, limiter: &RateLimiter, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;
        loop {
            let permit = limiter.acquire().await;
            let outcome = call().await;
            permit.release();
            attempt += 1;

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= max_attempts {
                if err.is_retryable() {
                    warn!(
                        operation,
                        attempts = attempt,
                        error = %redact(&err.to_string()),
                        "retry: giving up after exhausting attempts"
                    );
                }
                return Err(err.annotated(operation, attempt));
            }

            let delay = self.backoff_delay(attempt - 1, err.retry_after());
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %redact(&err.to_string()),
                "retry: attempt failed, backing off"
            );
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
