//! Download-client RPC configuration.
//!
//! Where to reach the aria2 JSON-RPC endpoint and how often to poll it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// aria2 JSON-RPC connection settings.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct RpcConfig {
    /// RPC host.
    #[validate(length(min = 1))]
    #[serde(default = "default_host")]
    pub host: String,

    /// RPC port.
    #[validate(range(min = 1))]
    #[serde(default = "default_port")]
    pub port: u16,

    /// `--rpc-secret` of the aria2 instance, empty when unset.
    #[serde(default)]
    pub secret: String,

    /// Seconds between two polls of the peer list.
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-request timeout (seconds).
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    6800
}
fn default_poll_interval() -> u64 {
    10
}
fn default_timeout() -> u64 {
    30
}

impl RpcConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// JSON-RPC endpoint URL.
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}/jsonrpc", self.host, self.port)
        } else {
            format!("http://{}:{}/jsonrpc", self.host, self.port)
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secret: String::new(),
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_timeout(),
        }
    }
}
