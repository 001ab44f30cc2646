//! Reconnection backoff policy.
//!
//! Retries are unbounded: the policy always yields a next delay, and only
//! session shutdown stops the retry loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay evolves across consecutive failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// `base * 2^(attempt-1)`, capped at `max_delay_ms`.
    Exponential,
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Delay before the first retry (and every retry for `Fixed`).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for `Exponential`.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Random jitter added on top of the delay (0 = none).
    #[serde(default)]
    pub jitter_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: 0,
        }
    }
}

/// Stateful backoff calculator for one session.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt. Never gives up.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.delay_for(self.attempt);
        delay + Duration::from_millis(jitter(self.config.jitter_ms))
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failed attempts since the last reset.
    pub fn attempt_count(&self) -> u32 {
        self.attempt
    }

    /// Delay (without jitter) for a 1-based attempt number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay_ms;
        let millis = match self.config.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                // attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base
                let exponent = attempt.saturating_sub(1).min(20);
                base.saturating_mul(1u64 << exponent)
                    .min(self.config.max_delay_ms.max(base))
            }
        };
        Duration::from_millis(millis)
    }
}

/// Pseudo-random jitter in `0..=max_ms` from the clock's sub-second nanos.
fn jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % (max_ms + 1)
}
