//! Bounded retry with a per-attempt timeout.
//!
//! Retry state lives on the stack of each [`RetryPolicy::run`] call, so
//! concurrent deliveries never share counters.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::channel::ChannelError;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// The same delay before every retry.
    #[default]
    Fixed,
    /// The delay grows by `delay_ms` with each retry.
    Linear,
}

/// Retry settings for one alert channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub delay_ms: u64,
    /// Delay growth.
    pub backoff: Backoff,
    /// Upper bound on a single attempt.
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff: Backoff::Fixed,
            timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once with the given timeout.
    pub fn once(timeout_ms: u64) -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
            backoff: Backoff::Fixed,
            timeout_ms,
        }
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        let millis = match self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Linear => self.delay_ms.saturating_mul(u64::from(retry.max(1))),
        };
        Duration::from_millis(millis)
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out.
    ///
    /// `op` receives the zero-based attempt number. On success, returns the
    /// value together with the number of retries it took.
    pub async fn run<T, F, Fut>(&self, channel: &str, mut op: F) -> Result<(T, u32), ChannelError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        let attempts = self.attempts();
        let mut last_error = ChannelError::NotConfigured;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.delay_before(attempt);
                debug!(channel, attempt, delay_ms = delay.as_millis() as u64, "Retrying channel delivery");
                sleep(delay).await;
            }

            let outcome = match timeout(self.timeout(), op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(ChannelError::Timeout(self.timeout_ms)),
            };

            match outcome {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(channel, attempt, error = %e, "Channel delivery attempt failed");
                    last_error = e;
                }
            }
        }

        if attempts == 1 {
            return Err(last_error);
        }
        Err(ChannelError::RetriesExhausted {
            attempts,
            last: last_error.to_string(),
        })
    }
}
