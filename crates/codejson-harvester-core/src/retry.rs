//! Bounded exponential retry schedule.
//!
//! [`RetryPolicy`] decides whether a failed attempt may be retried and for
//! how long to sleep first. It never sleeps itself; the async decorator in
//! the application crate drives the loop and owns a [`RetryState`] for the
//! duration of one remote operation.
//!
//! | attempt | sleep |
//! |---------|-------|
//! | 0 | `min(initial, max)` |
//! | n | `min(initial * factor^n, max)` |
//! | `max_retries` | give up |

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    /// Fractional jitter applied to each sleep (`0.1` = ±10%).
    #[serde(default)]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_secs() -> f64 {
    10.0
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_delay_secs() -> f64 {
    900.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_secs: default_initial_delay_secs(),
            backoff_factor: default_backoff_factor(),
            max_delay_secs: default_max_delay_secs(),
            jitter: 0.0,
        }
    }
}

/// What to do after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Total tries including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    /// Un-jittered backoff before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.config.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let raw = self.config.initial_delay_secs * exp;
        clamp_secs(raw, self.config.max_delay_secs)
    }

    /// Decide after a retryable failure on attempt `attempt` (0-based).
    ///
    /// `retry_after` is a server-provided hint and replaces the computed
    /// backoff. `jitter_sample` is expected in `[-1.0, 1.0]`.
    pub fn next(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        jitter_sample: f64,
    ) -> RetryDecision {
        if attempt >= self.config.max_retries {
            return RetryDecision::GiveUp;
        }
        let base = match retry_after {
            Some(hint) => clamp_secs(hint.as_secs_f64(), self.config.max_delay_secs),
            None => self.backoff(attempt),
        };
        let jitter = self.config.jitter.clamp(0.0, 1.0) * jitter_sample.clamp(-1.0, 1.0);
        let jittered = base.as_secs_f64() * (1.0 + jitter);
        RetryDecision::RetryAfter(clamp_secs(jittered, self.config.max_delay_secs))
    }

    /// Every sleep the policy would take before giving up, without jitter.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.config.max_retries).map(|a| self.backoff(a)).collect()
    }
}

/// Per-invocation retry counters. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub slept: Duration,
}

impl RetryState {
    pub fn record_sleep(&mut self, delay: Duration) {
        self.attempt += 1;
        self.slept += delay;
    }
}

fn clamp_secs(value: f64, max: f64) -> Duration {
    let capped = if value.is_finite() { value.min(max) } else { max };
    if capped.is_finite() && capped > 0.0 {
        Duration::from_secs_f64(capped)
    } else {
        Duration::ZERO
    }
}
