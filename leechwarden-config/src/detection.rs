//! Behavior analysis configuration.
//!
//! Thresholds that decide when a peer counts as a leecher, and how long its
//! statistics are remembered.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Share-ratio detection thresholds.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct DetectionConfig {
    /// Turns behavior analysis on or off.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Ratio floor; a peer giving less than this fraction of what it takes is in violation.
    #[validate(range(min = 0.0, max = 100.0))]
    #[validate(custom(function = validation::validate_finite))]
    #[serde(default = "default_min_share_ratio")]
    pub min_share_ratio: f64,

    /// Evidence required (sum of our upload rate samples) before judging a peer.
    #[serde(default = "default_min_data_threshold")]
    pub min_data_threshold: u64,

    /// Statistics of peers unseen for this long are forgotten (seconds).
    #[validate(range(min = 60, max = 604800))]
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Seconds between two staleness sweeps.
    #[validate(range(min = 1, max = 86400))]
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_min_share_ratio() -> f64 {
    0.1
}
fn default_min_data_threshold() -> u64 {
    10 * 1024 * 1024
}
fn default_stale_after() -> u64 {
    30 * 60
}
fn default_sweep_interval() -> u64 {
    5 * 60
}

impl DetectionConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            min_share_ratio: default_min_share_ratio(),
            min_data_threshold: default_min_data_threshold(),
            stale_after_secs: default_stale_after(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}
