//! Redial policy: jittered exponential backoff, 1 s doubling to a 60 s
//! cap, unlimited attempts unless bounded.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delay before the first redial.
    pub initial_delay: Duration,
    /// Ceiling on the delay between attempts.
    pub max_delay: Duration,
    /// Consecutive failures before giving up; `0` means never.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 0,
        }
    }
}

impl ReconnectBackoff {
    /// Delay for the given attempt number (0-indexed), with up to 25%
    /// deterministic jitter to spread redial storms after an edge restart.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let doubled = base_ms * 2f64.powi(attempt.min(31) as i32);
        let capped = doubled.min(self.max_delay.as_millis() as f64);
        let jitter = capped * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped + jitter) as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Deterministic "random" fraction in [0, 1) from the attempt number
/// (Knuth multiplicative hash). Not cryptographic; just spreads load.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761);
    f64::from(hash) / f64::from(u32::MAX)
}
