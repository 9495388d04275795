//! The alert channel seam and per-channel metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::delivery::{ChannelDeliveryResult, ChannelKind};
use super::payload::NotificationPayload;

/// A single channel's delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// No channel is wired in for this slot.
    #[error("channel not configured")]
    NotConfigured,

    /// An attempt exceeded its timeout.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Network or relay failure; worth retrying.
    #[error("{0}")]
    Transport(String),

    /// The remote end refused the message; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Every attempt failed.
    #[error("{last} (after {attempts} attempts)")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        last: String,
    },
}

impl ChannelError {
    /// Retries that were spent before this error was returned.
    pub fn retry_count(&self) -> u32 {
        match self {
            ChannelError::RetriesExhausted { attempts, .. } => attempts.saturating_sub(1),
            _ => 0,
        }
    }

    /// Returns true if another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::Timeout(_) | ChannelError::Transport(_))
    }
}

/// An outbound notification channel.
///
/// Implementations own their retry policy and per-call timeout; the
/// dispatcher calls `send` exactly once per dispatch.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Which slot this channel fills.
    fn kind(&self) -> ChannelKind;

    /// Delivers the payload.
    async fn send(&self, payload: &NotificationPayload)
        -> Result<ChannelDeliveryResult, ChannelError>;
}

/// Lock-free delivery counters for one channel.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    latency_ms: AtomicU64,
}

/// Point-in-time copy of [`ChannelMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// HTTP attempts, including retries.
    pub attempts: u64,
    /// Deliveries that succeeded.
    pub successes: u64,
    /// Deliveries that failed after retries.
    pub failures: u64,
    /// Cumulative wall time of all deliveries.
    pub total_latency_ms: u64,
}

impl ChannelMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one attempt.
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a finished delivery.
    pub fn record_outcome(&self, success: bool, elapsed: Duration) {
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Reads the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            total_latency_ms: self.latency_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        assert_eq!(ChannelError::NotConfigured.to_string(), "channel not configured");
        assert_eq!(ChannelError::Transport("SMTP down".into()).to_string(), "SMTP down");
        let exhausted = ChannelError::RetriesExhausted {
            attempts: 3,
            last: "SMTP down".into(),
        };
        assert_eq!(exhausted.to_string(), "SMTP down (after 3 attempts)");
        assert_eq!(exhausted.retry_count(), 2);
    }

    #[test]
    fn retryable_errors() {
        assert!(ChannelError::Timeout(10).is_retryable());
        assert!(ChannelError::Transport("x".into()).is_retryable());
        assert!(!ChannelError::Rejected("x".into()).is_retryable());
        assert!(!ChannelError::NotConfigured.is_retryable());
    }

    #[test]
    fn metrics_accumulate() {
        let metrics = ChannelMetrics::new();
        metrics.record_attempt();
        metrics.record_attempt();
        metrics.record_outcome(true, Duration::from_millis(30));
        metrics.record_outcome(false, Duration::from_millis(20));

        let snap = metrics.snapshot();
        assert_eq!(snap.attempts, 2);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.total_latency_ms, 50);
    }
}
