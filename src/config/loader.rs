//! Configuration loading from TOML file
use std::collections::HashSet;
use std::path::Path;

use tracing::info;

use crate::error::{Result, TickError};
use crate::types::{Config, MAX_REQUESTS_PER_SECOND, MAX_TICKS_PER_FETCH};

pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        TickError::Config(format!(
            "Failed to read config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| TickError::Config(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

/// `$CONFIG_PATH` if set (must exist), else `config.toml` if present, else defaults
pub fn load_from_env() -> Result<Config> {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => load_config(path.trim()),
        _ if Path::new(DEFAULT_CONFIG_PATH).exists() => load_config(DEFAULT_CONFIG_PATH),
        _ => {
            info!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
            let config = Config::default();
            validate_config(&config)?;
            Ok(config)
        }
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    // Instruments
    if config.instruments.is_empty() {
        return Err(TickError::Config("instruments list is empty".to_string()));
    }
    let mut seen = HashSet::new();
    for instrument in &config.instruments {
        if !seen.insert(instrument) {
            return Err(TickError::Config(format!("duplicate instrument {}", instrument)));
        }
    }

    // Batch cap
    if config.ticks_per_fetch == 0 || config.ticks_per_fetch > MAX_TICKS_PER_FETCH {
        return Err(TickError::Config(format!(
            "Invalid ticks_per_fetch: {} (must be 1..={})",
            config.ticks_per_fetch, MAX_TICKS_PER_FETCH
        )));
    }

    // Timeouts and pacing
    if config.connect_timeout_sec == 0 || config.request_timeout_sec == 0 {
        return Err(TickError::Config("timeouts must be > 0".to_string()));
    }
    if config.requests_per_second == 0 || config.requests_per_second > MAX_REQUESTS_PER_SECOND {
        return Err(TickError::Config(format!(
            "Invalid requests_per_second: {} (must be 1..={})",
            config.requests_per_second, MAX_REQUESTS_PER_SECOND
        )));
    }

    if !(config.api_url.starts_with("ws://") || config.api_url.starts_with("wss://")) {
        return Err(TickError::Config(format!(
            "api_url must be a ws:// or wss:// URL, got {}",
            config.api_url
        )));
    }

    if config.credential_env.trim().is_empty() {
        return Err(TickError::Config("credential_env is empty".to_string()));
    }

    Ok(())
}
