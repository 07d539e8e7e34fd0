//! ## leechwarden-detection::stats
//! **Per-peer statistics with staleness eviction**
//!
//! One record per observed address. Point updates and the periodic sweep all
//! go through a single `RwLock`, so a sweep never interleaves with an update of
//! the same record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace};

use leechwarden_core::time::{to_delta, Clock, SystemClock};

/// Cumulative counters and violation history of one peer address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerStats {
    pub address: String,
    /// Sum of sampled rates at which the peer sent to us.
    pub cumulative_inbound: u64,
    /// Sum of sampled rates at which the peer received from us.
    pub cumulative_outbound: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub violation_count: u32,
    pub last_blocked_at: Option<DateTime<Utc>>,
}

impl PeerStats {
    fn new(address: &str, now: DateTime<Utc>) -> Self {
        Self {
            address: address.to_string(),
            cumulative_inbound: 0,
            cumulative_outbound: 0,
            first_seen: now,
            last_seen: now,
            violation_count: 0,
            last_blocked_at: None,
        }
    }

    /// What the peer gave divided by what it took; 0 when it took nothing.
    pub fn share_ratio(&self) -> f64 {
        if self.cumulative_outbound == 0 {
            return 0.0;
        }
        self.cumulative_inbound as f64 / self.cumulative_outbound as f64
    }
}

pub struct PeerStatsStore {
    records: RwLock<HashMap<String, PeerStats>>,
    clock: Arc<dyn Clock>,
}

impl PeerStatsStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Adds one sample to the address's counters and returns the updated record.
    pub fn record_sample(&self, address: &str, inbound_rate: u64, outbound_rate: u64) -> PeerStats {
        self.observe(address, inbound_rate, outbound_rate, |stats, _| stats.clone())
    }

    /// Records a sample, then runs `judge` against the updated record while
    /// still holding the write lock.
    pub fn observe<R>(
        &self,
        address: &str,
        inbound_rate: u64,
        outbound_rate: u64,
        judge: impl FnOnce(&mut PeerStats, DateTime<Utc>) -> R,
    ) -> R {
        let now = self.clock.now();
        let mut records = self.records.write();
        let stats = records
            .entry(address.to_string())
            .or_insert_with(|| PeerStats::new(address, now));

        stats.cumulative_inbound = stats.cumulative_inbound.saturating_add(inbound_rate);
        stats.cumulative_outbound = stats.cumulative_outbound.saturating_add(outbound_rate);
        stats.last_seen = now;
        trace!(
            address,
            inbound = stats.cumulative_inbound,
            outbound = stats.cumulative_outbound,
            "Sample recorded"
        );

        judge(stats, now)
    }

    pub fn get(&self, address: &str) -> Option<PeerStats> {
        self.records.read().get(address).cloned()
    }

    /// Violation count of an address, 0 if it is unknown.
    pub fn violations(&self, address: &str) -> u32 {
        self.records
            .read()
            .get(address)
            .map_or(0, |stats| stats.violation_count)
    }

    pub fn reset_violations(&self, address: &str) {
        if let Some(stats) = self.records.write().get_mut(address) {
            stats.violation_count = 0;
            debug!(address, "Violations reset");
        }
    }

    /// Drops every record not seen within `max_age`. Returns how many were removed.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let now = self.clock.now();
        // An age beyond chrono's range cannot be exceeded by any record.
        let Some(cutoff) = to_delta(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return 0;
        };

        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, stats| stats.last_seen >= cutoff);
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, remaining = records.len(), "Stale peer statistics evicted");
        }
        removed
    }

    /// Point-in-time copy of every record.
    pub fn snapshot(&self) -> HashMap<String, PeerStats> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for PeerStatsStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}
