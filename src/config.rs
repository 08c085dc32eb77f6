//! Configuration using Figment
//!
//! Instrument definitions and logging settings are loaded from:
//! 1. a TOML file (`config/instruments.toml` by default)
//! 2. environment variables prefixed with `RUSTIVI_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! RUSTIVI_APPLICATION__LOG_LEVEL=debug
//! RUSTIVI_APPLICATION__NAME="bench 3"
//! ```
//!
//! # Example file
//!
//! ```toml
//! [application]
//! name = "bench"
//! log_level = "info"
//!
//! [[instruments]]
//! id = "dmm"
//! type = "hmc8012"
//! resource = "TCPIP0::192.168.1.20::5025::SOCKET"
//! id_query = true
//!
//! [[instruments]]
//! id = "scope"
//! type = "hmo1002"
//! simulate = true
//! ```

use crate::instruments::InitOptions;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IviConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Instrument definitions
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Supported instrument models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    /// R&S HMC8012 multimeter
    Hmc8012,
    /// R&S HMO1002 oscilloscope
    Hmo1002,
}

/// Instrument definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Unique instrument identifier
    pub id: String,
    /// Instrument model
    #[serde(rename = "type")]
    pub kind: InstrumentKind,
    /// VISA resource string (e.g., "TCPIP0::192.168.1.100::INSTR")
    #[serde(default)]
    pub resource: String,
    /// Whether this instrument is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Run without any I/O
    #[serde(default)]
    pub simulate: bool,
    /// Verify the model reported by `*IDN?` on open
    #[serde(default = "default_true")]
    pub id_query: bool,
    /// Send `*RST` on open
    #[serde(default)]
    pub reset: bool,
    /// I/O timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl InstrumentDefinition {
    /// Initialization options carried by this definition
    pub fn init_options(&self) -> InitOptions {
        InitOptions {
            id_query: self.id_query,
            reset: self.reset,
        }
    }
}

fn default_name() -> String {
    "rust_ivi".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    5000
}

impl IviConfig {
    /// Load configuration from `config/instruments.toml` and environment variables
    ///
    /// Environment variables (`RUSTIVI_` prefix) take precedence over the file.
    /// The result is validated before it is returned.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/instruments.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUSTIVI_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Instrument IDs are unique and non-empty
    /// - Instruments that talk to hardware have a resource string
    /// - Timeouts are non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if instrument.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Instrument ID cannot be empty".to_string(),
                ));
            }
            if !ids.insert(&instrument.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate instrument ID: '{}'",
                    instrument.id
                )));
            }
            if !instrument.simulate && instrument.resource.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': 'resource' cannot be empty unless simulate = true",
                    instrument.id
                )));
            }
            if instrument.timeout_ms == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': 'timeout_ms' must be > 0",
                    instrument.id
                )));
            }
        }

        Ok(())
    }

    /// Enabled instruments of one model
    pub fn instruments_of(&self, kind: InstrumentKind) -> Vec<&InstrumentDefinition> {
        self.instruments
            .iter()
            .filter(|inst| inst.kind == kind && inst.enabled)
            .collect()
    }

    /// Enabled instrument with the given id
    pub fn instrument(&self, id: &str) -> Option<&InstrumentDefinition> {
        self.instruments
            .iter()
            .find(|inst| inst.id == id && inst.enabled)
    }
}
