//! Prevention system configuration.
//!
//! Parameters for the nftables enforcement surface:
//! - Escalation base duration
//! - Table naming and the `nft` binary
//! - Peers that must never be blocked

use std::time::Duration;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Prevention system configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct PreventionConfig {
    /// First-offence block duration; the Nth offence is blocked N times as long (seconds).
    #[validate(range(min = 1, max = 604800))]
    #[serde(default = "default_base_duration")]
    pub base_duration_secs: u64,

    /// Name of the nftables table (family `inet`) owned by this process.
    #[validate(custom(function = validation::validate_nft_identifier))]
    #[serde(default = "default_table")]
    pub nft_table: String,

    /// Path or name of the `nft` executable.
    #[validate(length(min = 1))]
    #[serde(default = "default_nft_binary")]
    pub nft_binary: String,

    /// Whitelisted IP ranges, never evaluated or blocked.
    #[validate(custom(function = validation::validate_cidr_list))]
    #[serde(default)]
    pub whitelist: Vec<IpNetwork>,

    /// Remove the table on graceful shutdown.
    #[serde(default = "default_true")]
    pub destroy_on_exit: bool,
}

fn default_base_duration() -> u64 {
    5 * 60
}
fn default_table() -> String {
    "leechwarden".into()
}
fn default_nft_binary() -> String {
    "nft".into()
}
fn default_true() -> bool {
    true
}

impl PreventionConfig {
    pub fn base_duration(&self) -> Duration {
        Duration::from_secs(self.base_duration_secs)
    }
}

impl Default for PreventionConfig {
    fn default() -> Self {
        Self {
            base_duration_secs: default_base_duration(),
            nft_table: default_table(),
            nft_binary: default_nft_binary(),
            whitelist: Vec::new(),
            destroy_on_exit: default_true(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_default_prevention_config() {
        PreventionConfig::default()
            .validate()
            .expect("Default config should be valid");
    }

    #[test]
    fn invalid_table_name() {
        let config = PreventionConfig {
            nft_table: "drop table;".into(),
            ..PreventionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_whitelist() {
        let mut config = PreventionConfig::default();
        config.whitelist.push("192.168.1.0/24".parse().unwrap());
        config.whitelist.push("fd00::/8".parse().unwrap());
        config.validate().expect("Valid whitelist should pass");
    }
}
