//! Retry budget for contended claims.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound for exponential backoff delays.
pub const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// How the delay grows between retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Sleep `retry_delay` before every retry.
    #[default]
    Fixed,
    /// Double the delay on every retry, never exceeding `cap`.
    Exponential { cap: Duration },
}

/// Bounded retry configuration for claim and clear operations.
///
/// An operation makes at most `max_retries + 1` attempts, so the total time
/// spent sleeping is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub retry_delay: Duration,
    /// Delay growth strategy.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(50),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Create a fixed-delay policy.
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Use exponential backoff capped at [`MAX_BACKOFF`].
    pub fn with_exponential_backoff(mut self) -> Self {
        self.backoff = Backoff::Exponential { cap: MAX_BACKOFF };
        self
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.retry_delay,
            Backoff::Exponential { cap } => {
                let factor = 1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX);
                self.retry_delay.saturating_mul(factor).min(cap)
            }
        }
    }
}
