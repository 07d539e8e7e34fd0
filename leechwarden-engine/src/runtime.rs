//! Monitoring loop - ties polling, the staleness sweep, signals and shutdown
//! together.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn, Instrument};

use leechwarden_config::LeechwardenConfig;
use leechwarden_core::Clock;
use leechwarden_detection::PeerStatsStore;
use leechwarden_prevention::{FirewallManager, NftBackend};
use leechwarden_telemetry::{AuditLog, MetricsRecorder};

use crate::error::EngineError;
use crate::monitor::{Monitor, SharedFirewall};
use crate::source::PeerSource;

/// Out-of-band requests to a running loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Shutdown,
    RotateAuditLog,
}

pub struct Runtime<S: PeerSource, B: NftBackend> {
    config: LeechwardenConfig,
    monitor: Monitor<S, B>,
    store: Arc<PeerStatsStore>,
    firewall: SharedFirewall<B>,
    audit: Arc<AuditLog>,
    metrics: Arc<MetricsRecorder>,
}

impl<S: PeerSource, B: NftBackend> Runtime<S, B> {
    /// Sets up the enforcement surface and the audit log. Failing to set up
    /// the surface is fatal.
    pub fn new(
        config: LeechwardenConfig,
        source: S,
        backend: B,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        info!("Initializing runtime");
        debug!("Detection config: {:?}", config.detection);

        let firewall = FirewallManager::initialize(backend, &config.prevention.nft_table)?;
        let firewall = Arc::new(Mutex::new(firewall));
        let audit = Arc::new(AuditLog::with_clock(
            &config.telemetry.audit_log,
            clock.clone(),
        )?);
        let metrics = Arc::new(MetricsRecorder::new()?);
        let store = Arc::new(PeerStatsStore::new(clock));

        let monitor = Monitor::new(
            &config,
            source,
            store.clone(),
            firewall.clone(),
            audit.clone(),
            metrics.clone(),
        );
        Ok(Self {
            config,
            monitor,
            store,
            firewall,
            audit,
            metrics,
        })
    }

    pub fn monitor(&self) -> &Monitor<S, B> {
        &self.monitor
    }

    pub fn store(&self) -> &Arc<PeerStatsStore> {
        &self.store
    }

    pub fn firewall(&self) -> &SharedFirewall<B> {
        &self.firewall
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Runs until SIGINT/SIGTERM. SIGHUP rotates the audit log.
    pub async fn run(self) -> Result<B, EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = tokio::spawn(forward_signals(tx));
        let result = self.run_with(rx).await;
        listener.abort();
        result
    }

    /// Runs until [`Control::Shutdown`] arrives or every sender is gone, then
    /// tears the surface down and hands the backend back.
    #[instrument(skip_all, fields(table = %self.config.prevention.nft_table))]
    pub async fn run_with(
        self,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) -> Result<B, EngineError> {
        info!(
            "Monitoring {} every {}s, base block duration {}s",
            self.config.rpc.endpoint(),
            self.config.rpc.poll_interval_secs,
            self.config.prevention.base_duration_secs
        );

        let sweeper = self.spawn_sweeper();
        let mut ticker = interval(self.config.rpc.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = control.recv() => match message {
                    Some(Control::RotateAuditLog) => {
                        if let Err(e) = self.audit.rotate() {
                            error!("Failed to rotate audit log: {}", e);
                        }
                    }
                    Some(Control::Shutdown) | None => {
                        info!("Shutting down");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.monitor.poll_once().await {
                        error!("Error monitoring peers: {}", e);
                    }
                }
            }
        }

        sweeper.abort();
        self.shutdown()
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let metrics = self.metrics.clone();
        let max_age = self.config.detection.stale_after();
        let every = self.config.detection.sweep_interval();

        tokio::spawn(
            async move {
                let mut ticker = interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let removed = store.sweep_stale(max_age);
                    metrics.stale_evictions.inc_by(removed as u64);
                    metrics.tracked_peers.set(store.len() as i64);
                    if removed > 0 {
                        info!("Forgot {} stale peers", removed);
                    }
                }
            }
            .instrument(tracing::info_span!("sweep_task")),
        )
    }

    fn shutdown(self) -> Result<B, EngineError> {
        let Self {
            config,
            monitor,
            firewall,
            metrics,
            ..
        } = self;
        drop(monitor);

        let mut manager = Arc::try_unwrap(firewall)
            .map_err(|_| EngineError::Shutdown("firewall still in use".into()))?
            .into_inner();
        if config.prevention.destroy_on_exit {
            info!("Cleaning up nftables rules...");
            if let Err(e) = manager.destroy() {
                error!("Failed to cleanup nftables: {}", e);
            }
        }

        match metrics.gather_metrics() {
            Ok(text) => info!("Final metrics:\n{}", text),
            Err(e) => warn!("Failed to gather metrics: {}", e),
        }
        Ok(manager.close())
    }
}

#[cfg(unix)]
async fn forward_signals(tx: mpsc::UnboundedSender<Control>) {
    use tokio::signal::unix::{signal, SignalKind};

    let streams = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    );
    let (mut int, mut term, mut hup) = match streams {
        (Ok(int), Ok(term), Ok(hup)) => (int, term, hup),
        _ => {
            error!("Failed to install signal handlers, falling back to Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
            let _ = tx.send(Control::Shutdown);
            return;
        }
    };

    loop {
        let message = tokio::select! {
            _ = int.recv() => Control::Shutdown,
            _ = term.recv() => Control::Shutdown,
            _ = hup.recv() => Control::RotateAuditLog,
        };
        info!("Received signal, {:?}", message);
        if tx.send(message).is_err() || message == Control::Shutdown {
            return;
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(tx: mpsc::UnboundedSender<Control>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Control::Shutdown);
    }
}
