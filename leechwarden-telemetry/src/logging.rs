//! ## leechwarden-telemetry::logging
//! Structured logging with tracing and OpenTelemetry metadata.

use opentelemetry::KeyValue;
use tracing::{info, info_span};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
    pub fn init(default_level: &str) {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
            )
            .with_thread_names(true)
            .with_span_events(FmtSpan::ENTER)
            .init()
    }

    /// Emits one `peer_event` record with its attributes rendered as
    /// `key=value` pairs on the span.
    pub fn log_event(kind: &str, attributes: &[KeyValue]) {
        let rendered = attributes
            .iter()
            .map(|kv| format!("{}={}", kv.key.as_str(), kv.value))
            .collect::<Vec<_>>()
            .join(" ");
        let span = info_span!(
            "peer_event",
            kind,
            attributes = %rendered,
            otel.kind = "INTERNAL"
        );
        let _entered = span.enter();
        info!("{}", kind);
    }
}
