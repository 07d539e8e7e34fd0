// leechwarden-config/src/validation.rs
//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across multiple configuration modules.

use ipnetwork::IpNetwork;
use validator::ValidationError;

/// Reject whitelist entries that would cover an entire address family.
pub fn validate_cidr_list(cidrs: &[IpNetwork]) -> Result<(), ValidationError> {
    if cidrs.iter().any(|n| n.prefix() == 0) {
        return Err(ValidationError::new("whitelist_covers_everything"));
    }
    Ok(())
}

/// Reject NaN and infinities, which every comparison silently lets through.
pub fn validate_finite<T: std::borrow::Borrow<f64>>(value: T) -> Result<(), ValidationError> {
    if value.borrow().is_finite() {
        Ok(())
    } else {
        Err(ValidationError::new("not_finite"))
    }
}

/// Validate that a table name is a plain nftables identifier.
pub fn validate_nft_identifier(name: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new("^[A-Za-z][A-Za-z0-9_]{0,31}$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;
    if re.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_nft_identifier"))
    }
}

/// Validate a tracing level name.
pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid =
        ["trace", "debug", "info", "warn", "error"].contains(&level.to_lowercase().as_str());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}
