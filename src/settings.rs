//! Configuration loading and telemetry bootstrap
//!
//! Settings come from an optional `escrow.toml` file with `ESCROW_*`
//! environment variable overrides layered on top; anything not provided
//! falls back to `EscrowManagerConfig::default()`.

use config::{Config, Environment, File};

use crate::EscrowResult;
use crate::escrow_manager::{EscrowManagerConfig, MAX_FEE_PERCENT};
use crate::error::EscrowError;

/// Load the manager configuration from file and environment
pub fn load_config() -> EscrowResult<EscrowManagerConfig> {
    load_config_from("escrow")
}

/// Load configuration from a named file stem (without extension)
pub fn load_config_from(name: &str) -> EscrowResult<EscrowManagerConfig> {
    let settings = Config::builder()
        .add_source(File::with_name(name).required(false))
        .add_source(Environment::with_prefix("ESCROW"))
        .build()?;

    let config: EscrowManagerConfig = settings.try_deserialize()?;
    if config.fee_percent > MAX_FEE_PERCENT {
        return Err(EscrowError::config(format!(
            "fee_percent {} exceeds maximum {}",
            config.fee_percent, MAX_FEE_PERCENT
        )));
    }
    Ok(config)
}

/// Install the global tracing subscriber; safe to call more than once
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_sources() {
        let config = load_config_from("does-not-exist").unwrap();
        assert_eq!(config.fee_percent, EscrowManagerConfig::default().fee_percent);
        assert!(!config.platform_wallet.is_empty());
    }
}
