use thiserror::Error;
use tokio::task::JoinError;

use leechwarden_config::ConfigError;
use leechwarden_prevention::FirewallError;
use leechwarden_protocols::RpcError;
use leechwarden_telemetry::AuditError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Firewall error: {0}")]
    Firewall(#[from] FirewallError),

    #[error("Download client error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<JoinError> for EngineError {
    fn from(err: JoinError) -> Self {
        EngineError::Shutdown(err.to_string())
    }
}
