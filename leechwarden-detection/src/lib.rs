//! # leechwarden Detection Engine
//!
//! Stateful share-ratio analysis of download-client peers.
//!
//! - `stats`: per-address cumulative counters and violation history
//! - `analyzer`: turns samples into escalating block decisions

pub mod analyzer;
pub mod stats;

pub use analyzer::{BehaviorAnalyzer, BehaviorPolicy, DetectionDecision, ViolationReason};
pub use stats::{PeerStats, PeerStatsStore};
