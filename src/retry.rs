//! Pure retry/backoff policy value: max attempts, base delay, multiplier,
//! jitter fraction, and a delay ceiling.
//!
//! The policy only computes delays; it never sleeps. The scheduler
//! consults it and schedules the wake-time itself.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub jitter_fraction: f64,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_fraction: 0.1,
            ceiling: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Build a policy from a task's `retries` count (total attempts =
    /// retries + 1), keeping this policy's other parameters.
    pub fn with_max_attempts(mut self, retries: u32) -> Self {
        self.max_attempts = retries + 1;
        self
    }

    /// Delay before `attempt` (1-indexed, attempt ≥ 2). Attempt 1 never
    /// delays. `rng` is injected so tests can assert on the un-jittered
    /// bounds.
    pub fn delay_for_attempt(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2) as i32;
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let jitter = rng.gen_range((1.0 - self.jitter_fraction)..=(1.0 + self.jitter_fraction));
        let jittered = (base * jitter).max(0.0);
        let capped = jittered.min(self.ceiling.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    pub fn attempts_remaining(&self, attempts_used: u32) -> bool {
        attempts_used < self.max_attempts
    }
}
