//! Bounded reconnection with exponential backoff.

use std::time::Duration;

/// Retry policy shared by the initial handshake and in-session reconnects.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Maximum number of attempts (`None` = unbounded).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_attempts: Some(10),
        }
    }
}

impl ReconnectPolicy {
    /// Deterministic delay for the given attempt number (1-based), capped at
    /// `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }

    /// `delay_for_attempt` with jitter, so a fleet of failing sessions does
    /// not redial in lockstep. The result stays within (0.5, 1.0] of the
    /// deterministic delay.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        base.mul_f64(0.5 + rand::random::<f64>() * 0.5)
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt <= max,
            None => true,
        }
    }
}
