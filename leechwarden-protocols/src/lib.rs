//! # leechwarden Protocol Clients
//!
//! Crate for talking to the download client: the aria2 JSON-RPC client and
//! the BitTorrent peer-ID decoder used to label peers in logs and audit
//! records.

pub mod aria2;
pub mod peer_id;

pub use aria2::{Aria2Client, DownloadStatus, Peer, RpcError};
pub use peer_id::ClientInfo;
