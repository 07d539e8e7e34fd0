//! # leechwarden Configuration System
//!
//! Hierarchical configuration for the leecher detection daemon.
//!
//! ## Features
//! - **Unified Configuration**: one document for RPC, detection, prevention and telemetry
//! - **Validation**: runtime validation of every threshold before the daemon starts
//! - **Environment Overrides**: `LEECHWARDEN_*` variables on top of YAML

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod detection;
mod error;
mod prevention;
mod rpc;
mod telemetry;
mod validation;

pub use detection::DetectionConfig;
pub use error::ConfigError;
pub use prevention::PreventionConfig;
pub use rpc::RpcConfig;
pub use telemetry::TelemetryConfig;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/leechwarden.yaml";

/// Top‑level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct LeechwardenConfig {
    /// aria2 JSON-RPC endpoint and polling cadence.
    #[validate(nested)]
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Share-ratio thresholds and statistics retention.
    #[validate(nested)]
    #[serde(default)]
    pub detection: DetectionConfig,

    /// nftables enforcement parameters.
    #[validate(nested)]
    #[serde(default)]
    pub prevention: PreventionConfig,

    /// Logging and audit log.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl LeechwardenConfig {
    /// Load configuration from the default file and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/leechwarden.yaml`. If missing, defaults are used.
    /// 3. `LEECHWARDEN_*` environment variables (`__` separates sections).
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(LeechwardenConfig::default()));

        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            figment = figment.merge(Yaml::file(DEFAULT_CONFIG_PATH));
        }

        Self::finish(figment)
    }

    /// Load configuration from a specific path. The file must exist.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        Self::finish(
            Figment::from(Serialized::defaults(LeechwardenConfig::default()))
                .merge(Yaml::file(path)),
        )
    }

    /// Load from `path` when given, otherwise from the default location.
    pub fn load_optional<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed("LEECHWARDEN_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn full_config_validation() {
        let config = LeechwardenConfig::default();
        config.validate().expect("Default config should validate");
    }

    #[test]
    fn missing_default_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = LeechwardenConfig::load().expect("defaults should load");
            assert_eq!(config.rpc.port, 6800);
            assert_eq!(config.prevention.nft_table, "leechwarden");
            assert_eq!(config.detection.min_data_threshold, 10 * 1024 * 1024);
            Ok(())
        });
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/leechwarden.yaml",
                r#"
rpc:
  port: 6801
  secret: hunter2
detection:
  min_share_ratio: 0.25
prevention:
  base_duration_secs: 600
  whitelist: ["10.0.0.0/8"]
"#,
            )?;
            let config = LeechwardenConfig::load().expect("yaml should load");
            assert_eq!(config.rpc.port, 6801);
            assert_eq!(config.rpc.secret, "hunter2");
            assert_eq!(config.rpc.host, "127.0.0.1");
            assert_eq!(config.detection.min_share_ratio, 0.25);
            assert_eq!(config.prevention.base_duration().as_secs(), 600);
            assert_eq!(config.prevention.whitelist.len(), 1);
            Ok(())
        });
    }

    #[test]
    fn environment_override() {
        Jail::expect_with(|jail| {
            jail.set_env("LEECHWARDEN_RPC__POLL_INTERVAL_SECS", "3");
            jail.set_env("LEECHWARDEN_PREVENTION__NFT_TABLE", "bango");
            let config = LeechwardenConfig::load().expect("env should load");
            assert_eq!(config.rpc.poll_interval_secs, 3);
            assert_eq!(config.prevention.nft_table, "bango");
            Ok(())
        });
    }

    #[test]
    fn explicit_path_must_exist() {
        let err = LeechwardenConfig::load_from_path("/nonexistent/leechwarden.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn invalid_values_are_reported_with_paths() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.yaml", "prevention:\n  nft_table: \"9bad\"\n")?;
            let err = LeechwardenConfig::load_from_path("custom.yaml").unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
            assert!(err.to_string().contains("prevention.nft_table"));
            Ok(())
        });
    }
}
