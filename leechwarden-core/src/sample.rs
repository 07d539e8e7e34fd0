//! Direction-mapped traffic samples.
//!
//! A download client reports rates from its own point of view. The detection
//! side reasons from the peer's point of view: `inbound` is what the peer gives
//! us, `outbound` is what the peer takes from us. The mapping lives here and
//! nowhere else.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One instantaneous observation of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSample {
    pub address: String,
    /// Rate at which the peer sends to us.
    pub inbound_rate: u64,
    /// Rate at which the peer receives from us.
    pub outbound_rate: u64,
}

impl TrafficSample {
    /// Builds a sample from the client's own rates: `our_download` is what we
    /// receive from the peer, `our_upload` is what we send to it.
    pub fn from_client_rates(address: impl Into<String>, our_download: u64, our_upload: u64) -> Self {
        Self {
            address: address.into(),
            inbound_rate: our_download,
            outbound_rate: our_upload,
        }
    }

    pub fn ip(&self) -> Result<IpAddr, CoreError> {
        self.address
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidAddress(self.address.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_rates_map_to_peer_perspective() {
        let sample = TrafficSample::from_client_rates("10.0.0.1", 7, 900);
        assert_eq!(sample.inbound_rate, 7);
        assert_eq!(sample.outbound_rate, 900);
    }

    #[test]
    fn ip_parses_both_families() {
        assert!(TrafficSample::from_client_rates("10.0.0.1", 0, 0).ip().unwrap().is_ipv4());
        assert!(TrafficSample::from_client_rates("2001:db8::1", 0, 0).ip().unwrap().is_ipv6());
        assert!(matches!(
            TrafficSample::from_client_rates("not-an-ip", 0, 0).ip(),
            Err(CoreError::InvalidAddress(_))
        ));
    }
}
