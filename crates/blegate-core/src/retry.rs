//! Retry policy for listener and sender connections

use std::time::Duration;

use crate::config::RetryConfig;

/// Fixed-delay retry policy with an optional attempt cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, `None` for unlimited
    max_attempts: Option<u32>,
    delay: Duration,
}

impl RetryPolicy {
    /// Retry forever with a fixed delay
    pub fn indefinite(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    /// One initial attempt plus `extra` retries
    pub fn bounded(extra: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(extra.saturating_add(1)),
            delay,
        }
    }

    /// Policy for the always-on listener
    pub fn listener(config: &RetryConfig) -> Self {
        Self::indefinite(Duration::from_millis(config.listener_delay_ms))
    }

    /// Policy for transient sender sessions
    pub fn sender(config: &RetryConfig) -> Self {
        Self::bounded(
            config.sender_extra_attempts,
            Duration::from_millis(config.sender_delay_ms),
        )
    }

    /// Whether another attempt may follow `attempts_made` failed ones
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts_made < max,
            None => true,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}
