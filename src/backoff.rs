use rand::Rng;
use std::time::Duration;

/// Exponential backoff for reconnection attempts with an attempt limit.
///
/// Delay for attempt `n` (0 based): `min(max_delay, base * 2^n)` plus optional jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    max_attempts: u32,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
            max_attempts: 5,
            attempt: 0,
        }
    }
}

impl ExponentialBackoff {
    /// `jitter_factor` is a fraction of the delay (0.0 to 1.0), negative values are clamped to 0.
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            jitter_factor: jitter_factor.max(0.0),
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, `None` once `max_attempts` have been handed out.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let exp_delay = self.base.saturating_mul(2u32.saturating_pow(self.attempt));
        let capped_delay = exp_delay.min(self.max_delay);

        let jitter_range = capped_delay.as_secs_f64() * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_secs = (capped_delay.as_secs_f64() + jitter).max(0.0);

        self.attempt = self.attempt.saturating_add(1);

        Some(Duration::from_secs_f64(final_secs))
    }

    /// Call after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
