//! Where the poll cycle gets its peers from.

use async_trait::async_trait;

use leechwarden_protocols::{Aria2Client, Peer, RpcError};

#[async_trait]
pub trait PeerSource: Send + Sync {
    /// Every peer currently connected to an active torrent.
    async fn active_peers(&self) -> Result<Vec<Peer>, RpcError>;
}

#[async_trait]
impl PeerSource for Aria2Client {
    async fn active_peers(&self) -> Result<Vec<Peer>, RpcError> {
        Ok(self.all_peers().await?.into_values().flatten().collect())
    }
}
