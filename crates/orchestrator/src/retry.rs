use std::time::Duration;

use citabot_core::config::ConversationConfig;

/// Capped exponential backoff for provider calls. Attempt counts and delays
/// come from configuration; there is no unbounded retry anywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ConversationConfig) -> Self {
        Self {
            max_attempts: config.provider_retry_max.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            call_timeout: Duration::from_secs(config.provider_timeout_secs),
        }
    }

    /// Delay before retrying after the given failed attempt (1-based):
    /// base, 2x base, 4x base, ... capped at `max_delay`.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        let factor = 2u64.saturating_pow(exponent);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    pub fn attempts_exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }
}
