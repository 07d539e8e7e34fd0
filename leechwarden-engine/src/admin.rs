//! One-shot administrative operations against the enforcement surface.

use std::net::IpAddr;

use tracing::info;

use leechwarden_prevention::{cleanup, FirewallManager, NftBackend};
use leechwarden_telemetry::AuditLog;

use crate::error::EngineError;

/// Removes the table, whether or not it exists.
pub fn cleanup_table<B: NftBackend>(backend: &mut B, table: &str) -> Result<(), EngineError> {
    info!("Running in cleanup mode, removing nftables rules...");
    cleanup(backend, table)?;
    Ok(())
}

/// Currently blocked addresses, as the kernel sees them.
pub fn list_blocked<B: NftBackend>(backend: B, table: &str) -> Result<Vec<IpAddr>, EngineError> {
    let mut firewall = FirewallManager::open(backend, table)?;
    let mut addresses = firewall.list()?;
    addresses.sort();
    Ok(addresses)
}

/// Lifts the block on `address` and records it in the audit log.
pub fn unblock_address<B: NftBackend>(
    backend: B,
    table: &str,
    address: &str,
    audit: &AuditLog,
) -> Result<(), EngineError> {
    let mut firewall = FirewallManager::open(backend, table)?;
    firewall.unblock(address)?;
    audit.log_unblock(address, "manual")?;
    info!("Unblocked {}", address);
    Ok(())
}
