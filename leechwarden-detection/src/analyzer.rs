//! ## leechwarden-detection::analyzer
//! **Share-ratio judgment with escalating punishment**
//!
//! The ratio is always recomputed from cumulative counters, so a peer is only
//! judged on everything seen so far, never on one noisy sample. Every
//! violation lengthens the next block linearly:
//! `block_duration = violation_count × base_duration`.
//! Escalation only resets when the store forgets the peer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument};

use leechwarden_core::TrafficSample;

use crate::stats::PeerStatsStore;

/// Why a peer was judged to be in violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationReason {
    LowShareRatio,
}

impl ViolationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationReason::LowShareRatio => "low_share_ratio",
        }
    }
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A block verdict for one address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionDecision {
    pub address: String,
    pub reason: ViolationReason,
    pub share_ratio: f64,
    pub violation_count: u32,
    pub block_duration: Duration,
}

/// Thresholds applied by [`BehaviorAnalyzer`].
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorPolicy {
    pub enabled: bool,
    /// Strict floor: a ratio equal to it is acceptable.
    pub min_share_ratio: f64,
    /// Minimum cumulative outbound before a peer is judged at all.
    pub min_data_threshold: u64,
}

impl Default for BehaviorPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_share_ratio: 0.1,
            min_data_threshold: 10 * 1024 * 1024,
        }
    }
}

pub struct BehaviorAnalyzer {
    store: Arc<PeerStatsStore>,
    policy: BehaviorPolicy,
}

impl BehaviorAnalyzer {
    pub fn new(store: Arc<PeerStatsStore>, policy: BehaviorPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<PeerStatsStore> {
        &self.store
    }

    pub fn policy(&self) -> &BehaviorPolicy {
        &self.policy
    }

    /// Records a sample and decides whether the peer must be blocked.
    #[instrument(level = "debug", skip(self))]
    pub fn evaluate(
        &self,
        address: &str,
        inbound_rate: u64,
        outbound_rate: u64,
        base_duration: Duration,
    ) -> Option<DetectionDecision> {
        if !self.policy.enabled {
            return None;
        }

        let policy = &self.policy;
        self.store
            .observe(address, inbound_rate, outbound_rate, |stats, now| {
                if stats.cumulative_outbound < policy.min_data_threshold {
                    return None;
                }

                let share_ratio = stats.share_ratio();
                if share_ratio >= policy.min_share_ratio {
                    return None;
                }

                stats.violation_count = stats.violation_count.saturating_add(1);
                stats.last_blocked_at = Some(now);

                Some(DetectionDecision {
                    address: stats.address.clone(),
                    reason: ViolationReason::LowShareRatio,
                    share_ratio,
                    violation_count: stats.violation_count,
                    block_duration: base_duration.saturating_mul(stats.violation_count),
                })
            })
            .inspect(|decision| {
                debug!(
                    address = %decision.address,
                    share_ratio = decision.share_ratio,
                    violations = decision.violation_count,
                    duration_secs = decision.block_duration.as_secs(),
                    "Leecher detected"
                );
            })
    }

    pub fn evaluate_sample(
        &self,
        sample: &TrafficSample,
        base_duration: Duration,
    ) -> Option<DetectionDecision> {
        self.evaluate(
            &sample.address,
            sample.inbound_rate,
            sample.outbound_rate,
            base_duration,
        )
    }
}
