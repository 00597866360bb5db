// crates/core/src/retry.rs
//! Exponential-backoff retry policy for transient failures.

use rand::Rng;
use std::time::Duration;

/// Backoff schedule: `base * multiplier^(attempt-1)`, capped, plus a
/// uniform 0.1–0.3 fraction of jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let raw = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exp as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let with_jitter = if self.jitter {
            let fraction = rand::thread_rng().gen_range(0.1..0.3);
            capped + fraction * capped
        } else {
            capped
        };

        Duration::from_secs_f64(with_jitter)
    }

    /// Whether another retry is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
