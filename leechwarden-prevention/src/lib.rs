//! # leechwarden Prevention Modules
//!
//! Kernel-level enforcement through nftables. Blocks are time-bounded set
//! elements; the kernel expires them without any help from this process and
//! stays the only record of what is currently blocked.

pub mod error;
pub mod firewall;

pub use error::FirewallError;
pub use firewall::{cleanup, FirewallManager, MemoryNft, NftBackend, NftCommand};
