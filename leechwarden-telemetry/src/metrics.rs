//! ## leechwarden-telemetry::metrics
//! Prometheus counters for the poll cycle, block decisions and the staleness
//! sweep.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: prometheus::Registry,
    pub peers_evaluated: IntCounter,
    pub blocks: IntCounter,
    pub block_failures: IntCounter,
    pub poll_errors: IntCounter,
    pub stale_evictions: IntCounter,
    pub tracked_peers: IntGauge,
    pub poll_duration: Histogram,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let peers_evaluated = IntCounter::new(
            "leechwarden_peers_evaluated_total",
            "Peer samples fed to the behavior analyzer",
        )?;
        let blocks = IntCounter::new("leechwarden_blocks_total", "Peers blocked")?;
        let block_failures = IntCounter::new(
            "leechwarden_block_failures_total",
            "Block decisions the kernel rejected",
        )?;
        let poll_errors = IntCounter::new(
            "leechwarden_poll_errors_total",
            "Poll cycles that failed to reach the download client",
        )?;
        let stale_evictions = IntCounter::new(
            "leechwarden_stale_evictions_total",
            "Peer records removed by the staleness sweep",
        )?;
        let tracked_peers =
            IntGauge::new("leechwarden_tracked_peers", "Peer records currently held")?;
        let poll_duration = Histogram::with_opts(
            HistogramOpts::new("leechwarden_poll_duration_seconds", "Poll cycle wall time")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;

        registry.register(Box::new(peers_evaluated.clone()))?;
        registry.register(Box::new(blocks.clone()))?;
        registry.register(Box::new(block_failures.clone()))?;
        registry.register(Box::new(poll_errors.clone()))?;
        registry.register(Box::new(stale_evictions.clone()))?;
        registry.register(Box::new(tracked_peers.clone()))?;
        registry.register(Box::new(poll_duration.clone()))?;

        Ok(Self {
            registry,
            peers_evaluated,
            blocks,
            block_failures,
            poll_errors,
            stale_evictions,
            tracked_peers,
            poll_duration,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
