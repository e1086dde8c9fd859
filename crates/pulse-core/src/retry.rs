//! Bounded retry with linear backoff.
//!
//! Every retrying call site (startup snapshot load, repository updates,
//! read-back, snapshot dumps, agent deliveries) goes through [`retry`].
//! Only errors accepted by the caller's `is_retryable` predicate are
//! retried; anything else is returned on first occurrence.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How many times to retry and how long to wait between attempts.
///
/// The delay before retry `n` (0-based) is `base + step * n`; the default
/// policy waits 1s, 3s, 5s, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `retries + 1`.
    pub retries: u32,
    pub base: Duration,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3)
    }
}

impl RetryPolicy {
    /// `retries` retries on the standard 1s + 2s·attempt schedule.
    pub fn linear(retries: u32) -> Self {
        Self {
            retries,
            base: Duration::from_secs(1),
            step: Duration::from_secs(2),
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            retries: 0,
            base: Duration::ZERO,
            step: Duration::ZERO,
        }
    }

    /// Retries without sleeping in between (for tests).
    pub fn immediate(retries: u32) -> Self {
        Self {
            retries,
            base: Duration::ZERO,
            step: Duration::ZERO,
        }
    }

    /// Delay to wait before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base + self.step * attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are exhausted. The last error is returned unchanged.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries && is_retryable(&e) => {
                let delay = policy.delay(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
