//! One poll cycle: fetch peers, judge each one, enforce the verdicts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ipnetwork::IpNetwork;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use leechwarden_config::LeechwardenConfig;
use leechwarden_detection::{BehaviorAnalyzer, BehaviorPolicy, DetectionDecision, PeerStatsStore};
use leechwarden_prevention::{FirewallManager, NftBackend};
use leechwarden_protocols::{peer_id, Peer};
use leechwarden_telemetry::{AuditLog, BlockDetails, EventLogger, MetricsRecorder};

use crate::error::EngineError;
use crate::source::PeerSource;

/// Shared firewall handle; every mutation goes through this one lock.
pub type SharedFirewall<B> = Arc<Mutex<FirewallManager<B>>>;

/// Outcome of one poll cycle.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub peers_seen: usize,
    pub evaluated: usize,
    pub whitelisted: usize,
    pub invalid: usize,
    pub blocked: Vec<DetectionDecision>,
    pub failures: usize,
}

pub struct Monitor<S: PeerSource, B: NftBackend> {
    source: S,
    analyzer: BehaviorAnalyzer,
    firewall: SharedFirewall<B>,
    audit: Arc<AuditLog>,
    metrics: Arc<MetricsRecorder>,
    whitelist: Vec<IpNetwork>,
    base_duration: Duration,
}

impl<S: PeerSource, B: NftBackend> Monitor<S, B> {
    pub fn new(
        config: &LeechwardenConfig,
        source: S,
        store: Arc<PeerStatsStore>,
        firewall: SharedFirewall<B>,
        audit: Arc<AuditLog>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let policy = BehaviorPolicy {
            enabled: config.detection.enabled,
            min_share_ratio: config.detection.min_share_ratio,
            min_data_threshold: config.detection.min_data_threshold,
        };
        Self {
            source,
            analyzer: BehaviorAnalyzer::new(store, policy),
            firewall,
            audit,
            metrics,
            whitelist: config.prevention.whitelist.clone(),
            base_duration: config.prevention.base_duration(),
        }
    }

    pub fn analyzer(&self) -> &BehaviorAnalyzer {
        &self.analyzer
    }

    /// Runs one cycle. Only a failure to reach the download client is an
    /// error; per-peer problems are logged and counted in the report.
    #[instrument(skip_all)]
    pub async fn poll_once(&self) -> Result<CycleReport, EngineError> {
        let started = Instant::now();
        let peers = match self.source.active_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                self.metrics.poll_errors.inc();
                return Err(e.into());
            }
        };

        let mut report = CycleReport {
            peers_seen: peers.len(),
            ..CycleReport::default()
        };
        for peer in &peers {
            self.handle_peer(peer, &mut report);
        }

        self.metrics
            .tracked_peers
            .set(self.analyzer.store().len() as i64);
        self.metrics
            .poll_duration
            .observe(started.elapsed().as_secs_f64());
        debug!(
            peers = report.peers_seen,
            evaluated = report.evaluated,
            blocked = report.blocked.len(),
            "Poll cycle finished"
        );
        Ok(report)
    }

    fn handle_peer(&self, peer: &Peer, report: &mut CycleReport) {
        let mut sample = peer.traffic_sample();
        let ip = match sample.ip() {
            Ok(ip) => ip.to_canonical(),
            Err(e) => {
                warn!("Skipping peer: {}", e);
                report.invalid += 1;
                return;
            }
        };
        if self.whitelist.iter().any(|net| net.contains(ip)) {
            report.whitelisted += 1;
            return;
        }
        // Statistics follow the same address the firewall blocks.
        sample.address = ip.to_string();

        report.evaluated += 1;
        self.metrics.peers_evaluated.inc();
        let Some(decision) = self.analyzer.evaluate_sample(&sample, self.base_duration) else {
            return;
        };

        let client = peer_id::name_with_version(&peer.peer_id);
        let result = self
            .firewall
            .lock()
            .block(&decision.address, decision.block_duration);

        match result {
            Ok(()) => {
                self.metrics.blocks.inc();
                info!(
                    "Blocked {} ({}) reason: {}, violations: {}, duration: {}s, share_ratio: {:.4}",
                    decision.address,
                    client,
                    decision.reason,
                    decision.violation_count,
                    decision.block_duration.as_secs(),
                    decision.share_ratio
                );
                EventLogger::log_event(
                    "peer_blocked",
                    &[
                        KeyValue::new("ip", decision.address.clone()),
                        KeyValue::new("client", client.clone()),
                        KeyValue::new("violations", i64::from(decision.violation_count)),
                        KeyValue::new("duration_secs", decision.block_duration.as_secs() as i64),
                    ],
                );

                let details = BlockDetails {
                    ip: decision.address.clone(),
                    peer_id: peer.peer_id.clone(),
                    client_name: client,
                    reason: decision.reason.to_string(),
                    duration_secs: decision.block_duration.as_secs(),
                    violations: decision.violation_count,
                    download_speed: peer.download_speed,
                    upload_speed: peer.upload_speed,
                    share_ratio: decision.share_ratio,
                };
                if let Err(e) = self.audit.log_block(details) {
                    error!("Failed to write audit record for {}: {}", decision.address, e);
                }
                report.blocked.push(decision);
            }
            Err(e) => {
                self.metrics.block_failures.inc();
                report.failures += 1;
                error!("Failed to block {}: {}", decision.address, e);
                EventLogger::log_event(
                    "block_failed",
                    &[
                        KeyValue::new("ip", decision.address.clone()),
                        KeyValue::new("error", e.to_string()),
                    ],
                );
            }
        }
    }
}
