//! Service configuration validation.
//!
//! Checks the engine settings before any store or engine is opened.

use crate::domain::backtest::EngineSettings;
use crate::domain::error::StratlabError;
use crate::ports::config_port::ConfigPort;

pub fn validate_service_config(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    validate_trading_fee(config)?;
    validate_lookback(config)?;
    validate_leverage(config)?;
    validate_pool_size(config)?;
    Ok(())
}

/// Validated engine settings, falling back to the defaults for absent keys.
pub fn build_engine_settings(config: &dyn ConfigPort) -> Result<EngineSettings, StratlabError> {
    validate_service_config(config)?;
    let defaults = EngineSettings::default();
    Ok(EngineSettings {
        trading_fee: config.get_double("engine", "trading_fee", defaults.trading_fee),
        lookback: config.get_int("engine", "lookback", defaults.lookback as i64) as u32,
        leverage: config.get_double("engine", "leverage", defaults.leverage),
    })
}

fn validate_trading_fee(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    let value = config.get_double("engine", "trading_fee", EngineSettings::default().trading_fee);
    if !value.is_finite() || value < 0.0 {
        return Err(StratlabError::ConfigInvalid {
            section: "engine".to_string(),
            key: "trading_fee".to_string(),
            reason: "trading_fee must be non-negative".to_string(),
        });
    }
    Ok(())
}

fn validate_lookback(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    let value = config.get_int("engine", "lookback", EngineSettings::default().lookback as i64);
    if value < 1 || value > u32::MAX as i64 {
        return Err(StratlabError::ConfigInvalid {
            section: "engine".to_string(),
            key: "lookback".to_string(),
            reason: "lookback must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn validate_leverage(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    let value = config.get_double("engine", "leverage", EngineSettings::default().leverage);
    if !value.is_finite() || value <= 0.0 {
        return Err(StratlabError::ConfigInvalid {
            section: "engine".to_string(),
            key: "leverage".to_string(),
            reason: "leverage must be positive".to_string(),
        });
    }
    Ok(())
}

fn validate_pool_size(config: &dyn ConfigPort) -> Result<(), StratlabError> {
    let value = config.get_int("sqlite", "pool_size", 4);
    if value < 1 {
        return Err(StratlabError::ConfigInvalid {
            section: "sqlite".to_string(),
            key: "pool_size".to_string(),
            reason: "pool_size must be at least 1".to_string(),
        });
    }
    Ok(())
}
