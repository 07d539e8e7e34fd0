//! Observability configuration.
//!
//! Log verbosity and the location of the append-only audit log.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Telemetry configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct TelemetryConfig {
    /// Default log level when `RUST_LOG` is unset.
    #[validate(custom(function = validation::validate_log_level))]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON-lines audit log of block/unblock events.
    #[serde(default = "default_audit_log")]
    pub audit_log: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_audit_log() -> PathBuf {
    PathBuf::from("/var/log/leechwarden/blocked.log")
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            audit_log: default_audit_log(),
        }
    }
}
