//! Delay controller: per-call and inter-item pacing.
//!
//! Both delays are pure functions of configuration plus the target's item
//! count. They are computed once per target, after listing, and stay fixed
//! for that target's run (see [`DelayPlan`]).
//!
//! # Per-call delay
//!
//! Applied around every outbound collaborator call:
//!
//! ```text
//! scale = 1                                          count unknown or <= threshold
//! scale = 1 + (count - threshold) / threshold * (factor - 1)   otherwise
//! delay = max(base, min(base * scale, max))
//! ```
//!
//! # Inter-item delay
//!
//! Applied once after each repository completes, before its worker slot
//! is released:
//!
//! ```text
//! delay = 0                                                   disabled or effective <= threshold
//! delay = min(base * (1 + (effective - threshold) / threshold), max)   otherwise
//! ```
//!
//! With a creation-date filter active the *effective* count discounts
//! repositories not touched since the filter date by `modified_weight`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call delay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayConfig {
    #[serde(default = "default_base_secs")]
    pub base_secs: f64,
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    #[serde(default = "default_max_secs")]
    pub max_secs: f64,
}

fn default_base_secs() -> f64 {
    0.1
}
fn default_threshold() -> usize {
    100
}
fn default_scale_factor() -> f64 {
    1.5
}
fn default_max_secs() -> f64 {
    1.0
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            base_secs: default_base_secs(),
            threshold: default_threshold(),
            scale_factor: default_scale_factor(),
            max_secs: default_max_secs(),
        }
    }
}

impl DelayConfig {
    /// Per-call delay for a target holding `count` repositories.
    pub fn per_call(&self, count: Option<usize>) -> Duration {
        let base = self.base_secs.max(0.0);
        let count = match count {
            Some(c) if self.threshold > 0 && c > self.threshold => c,
            _ => return secs(base),
        };

        let excess = (count - self.threshold) as f64 / self.threshold as f64;
        let growth = if self.scale_factor >= 1.0 {
            self.scale_factor - 1.0
        } else {
            0.0
        };
        let scaled = base * (1.0 + excess * growth);
        secs(scaled.min(self.max_secs).max(base))
    }
}

/// Inter-item (adaptive) delay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveDelayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_adaptive_base_secs")]
    pub base_secs: f64,
    #[serde(default = "default_adaptive_threshold")]
    pub threshold: usize,
    #[serde(default = "default_adaptive_max_secs")]
    pub max_secs: f64,
    /// Weight given to repositories not touched since the filter date.
    #[serde(default = "default_modified_weight")]
    pub modified_weight: f64,
}

fn default_adaptive_base_secs() -> f64 {
    0.1
}
fn default_adaptive_threshold() -> usize {
    50
}
fn default_adaptive_max_secs() -> f64 {
    2.0
}
fn default_modified_weight() -> f64 {
    0.10
}

impl Default for AdaptiveDelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_secs: default_adaptive_base_secs(),
            threshold: default_adaptive_threshold(),
            max_secs: default_adaptive_max_secs(),
            modified_weight: default_modified_weight(),
        }
    }
}

impl AdaptiveDelayConfig {
    /// Count used to scale the inter-item delay.
    ///
    /// `recent` is the number of repositories touched since the filter
    /// date, or `None` when no filter is active.
    pub fn effective_count(&self, total: usize, recent: Option<usize>) -> usize {
        match recent {
            None => total,
            Some(recent) => {
                let recent = recent.min(total);
                let older = (total - recent) as f64 * self.modified_weight.max(0.0);
                recent + older.round() as usize
            }
        }
    }

    /// Inter-item delay for an effective count.
    pub fn inter_item(&self, effective: usize) -> Duration {
        if !self.enabled || effective <= self.threshold {
            return Duration::ZERO;
        }
        let base = self.base_secs.max(0.0);
        if self.threshold == 0 {
            return secs(base.min(self.max_secs));
        }
        let excess = (effective - self.threshold) as f64 / self.threshold as f64;
        secs((base * (1.0 + excess)).min(self.max_secs))
    }
}

/// Delays fixed for one target's run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayPlan {
    pub item_count: usize,
    pub effective_count: usize,
    pub per_call: Duration,
    pub inter_item: Duration,
}

impl DelayPlan {
    pub fn compute(
        delay: &DelayConfig,
        adaptive: &AdaptiveDelayConfig,
        total: usize,
        recent: Option<usize>,
    ) -> Self {
        let effective_count = adaptive.effective_count(total, recent);
        Self {
            item_count: total,
            effective_count,
            per_call: delay.per_call(Some(total)),
            inter_item: adaptive.inter_item(effective_count),
        }
    }

    /// Plan with no pacing at all.
    pub fn none() -> Self {
        Self {
            item_count: 0,
            effective_count: 0,
            per_call: Duration::ZERO,
            inter_item: Duration::ZERO,
        }
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}
