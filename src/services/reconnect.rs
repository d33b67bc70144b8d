//! Bounded linear-backoff reconnect policy.

use std::time::Duration;

use crate::config::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.max_reconnect_attempts, config.reconnect_base_delay)
    }

    /// Delay before the next attempt, given how many attempts were already made.
    /// `None` once the budget is spent.
    pub fn next_delay(&self, attempts_made: u32) -> Option<Duration> {
        if attempts_made >= self.max_attempts {
            return None;
        }
        Some(self.base_delay.saturating_mul(attempts_made + 1))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}
