use thiserror::Error;

#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("nftables commit failed: {0}")]
    Commit(String),

    #[error("nftables query failed: {0}")]
    Query(String),

    #[error("nftables table `{0}` does not exist")]
    TableMissing(String),

    #[error("Failed to run nft: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed nftables JSON: {0}")]
    Json(#[from] serde_json::Error),
}
