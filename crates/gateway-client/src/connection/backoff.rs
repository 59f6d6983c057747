//! Reconnect backoff

use gateway_common::ReconnectConfig;
use std::time::Duration;

/// Exponential backoff with full jitter for failed transport opens
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_delay_ms),
            max: Duration::from_millis(config.max_delay_ms.max(config.initial_delay_ms)),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Upper bound of the delay after `attempt` consecutive failures (1-based)
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial
            .checked_mul(1 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Delay before the next attempt, uniformly drawn from `[0, ceiling]`
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.ceiling(attempt).mul_f64(rand::random::<f64>())
    }

    /// Whether `attempt` failures exhaust the budget
    #[must_use]
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
