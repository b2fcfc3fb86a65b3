//! Engine configuration.

use crate::backoff::ExponentialBackoff;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Levels kept per side after every mutation.
    pub depth_limit: usize,
    /// First reconnect delay, doubled per attempt.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Failed reconnect attempts before the engine gives up.
    pub max_reconnect_attempts: u32,
    /// Fraction of each delay applied as random jitter.
    pub jitter_factor: f64,
    /// Upper bound for a single connect call.
    pub connect_timeout: Duration,
    /// Check feed update ids and resync on gaps.
    pub sequence_check: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            depth_limit: 20,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            jitter_factor: 0.0,
            connect_timeout: Duration::from_secs(10),
            sequence_check: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `BOOK_DEPTH_LIMIT`, `BOOK_MAX_RECONNECT_ATTEMPTS` and
    /// `BOOK_SEQUENCE_CHECK`. Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(depth) = env_var::<usize>("BOOK_DEPTH_LIMIT").filter(|d| *d > 0) {
            config.depth_limit = depth;
        }
        if let Some(attempts) = env_var("BOOK_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = attempts;
        }
        if let Some(check) = env_var("BOOK_SEQUENCE_CHECK") {
            config.sequence_check = check;
        }
        config
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.backoff_base,
            self.backoff_max,
            self.jitter_factor,
            self.max_reconnect_attempts,
        )
    }
}

fn env_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring invalid config value");
            None
        }
    }
}
