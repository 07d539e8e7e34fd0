//! # leechwarden Telemetry
//!
//! Crate for logging, metrics and the append-only audit log of block
//! decisions.

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::{AuditError, AuditEvent, AuditLog, AuditRecord, BlockDetails};
pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
