//! Exponential backoff with jitter.
//!
//! [`RetryConfig`] is the serializable policy; [`Backoff`] walks through the
//! delays it produces. The async retry loop that sleeps between attempts lives
//! with the engine, which decides per error whether another attempt is allowed.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff policy for mutating calls that fail transiently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = bounded only by the step budget)
    pub max_attempts: u32,
    /// Initial delay between attempts, in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between attempts, in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Initial delay as a duration
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Maximum delay as a duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Start a fresh backoff sequence for this policy
    pub fn backoff(&self) -> Backoff {
        Backoff {
            config: self.clone(),
            attempt: 0,
            delay: self.initial_delay(),
        }
    }
}

/// One sequence of delays produced by a [`RetryConfig`]
#[derive(Clone, Debug)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
    delay: Duration,
}

impl Backoff {
    /// Number of delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Whether another attempt is allowed after `self.attempts() + 1` tries
    pub fn exhausted(&self) -> bool {
        self.config.max_attempts > 0 && self.attempt + 1 >= self.config.max_attempts
    }

    /// Next delay, jittered to 0.5x..1.5x and capped at the configured maximum.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = Duration::from_secs_f64(self.delay.as_secs_f64() * jitter);

        self.delay = Duration::from_secs_f64(
            (self.delay.as_secs_f64() * self.config.backoff_multiplier)
                .min(self.config.max_delay().as_secs_f64()),
        );

        jittered.min(self.config.max_delay())
    }
}
