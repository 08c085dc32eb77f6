//! Tracing setup
//!
//! Drivers only emit `tracing` events: round trips and cache hits at `debug`,
//! ladder substitutions at `warn`, initialization at `info`. Applications call
//! [`init`] once to print them.

use crate::config::ApplicationConfig;
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Filter for `level`, unless `RUST_LOG` is set
pub fn filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(format!("rust_ivi={}", level))
        .map_err(|e| anyhow!("Invalid log level '{}': {}", level, e))
}

/// Install a global fmt subscriber at `level`
///
/// Fails if a global subscriber is already installed.
pub fn init(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level)?)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

/// Install the subscriber using the configured log level
pub fn init_from_config(config: &ApplicationConfig) -> Result<()> {
    init(&config.log_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(filter(level).is_ok());
        }
    }
}
