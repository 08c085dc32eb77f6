//! Custom error types for the drivers.
//!
//! This module defines `DriverError`, the single error type returned by every
//! cached accessor and instrument operation in the crate. It is built with
//! `thiserror` so that transport failures (reported by sessions as
//! `anyhow::Error`) convert seamlessly with the `?` operator.
//!
//! ## Error Taxonomy
//!
//! - **`OutOfRange`**: an index or slot number outside its bounds (a channel that
//!   does not exist, a memory slot above the instrument's capacity).
//! - **`UnsupportedValue`**: a value outside a closed admitted set, or of a kind
//!   the attribute cannot hold. Raised before any I/O or cache mutation.
//! - **`DeviceIdentityMismatch`**: the instrument answered `*IDN?` with an
//!   unexpected model during initialization. Fatal to setup.
//! - **`Session`**: transport failures, passed through from the session.
//!
//! Values snapped onto an ordered ladder are *not* errors: the substitution is
//! recovered locally and surfaced as a `tracing` warning (see
//! [`crate::attribute::domain::Substitution`]).

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Index {index} out of range for '{target}' (valid: {min}..={max})")]
    OutOfRange {
        target: String,
        index: usize,
        min: usize,
        max: usize,
    },

    #[error("Value '{value}' is not supported by '{attribute}'")]
    UnsupportedValue { attribute: String, value: String },

    #[error("Instrument ID mismatch, expecting {expected}, got {actual}")]
    DeviceIdentityMismatch { expected: String, actual: String },

    #[error("Attribute '{0}' is read-only")]
    ReadOnly(&'static str),

    #[error("Failed to parse reply '{reply}' for '{attribute}'")]
    Parse { attribute: String, reply: String },

    #[error("Malformed attribute table: {0}")]
    InvalidAttributeTable(String),

    #[error("Failed to format command '{template}': {reason}")]
    Command { template: String, reason: String },

    #[error("Invalid IEEE 488.2 block: {0}")]
    Block(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error(transparent)]
    Session(#[from] anyhow::Error),
}

impl DriverError {
    /// Builds an `UnsupportedValue` error for `attribute`.
    pub fn unsupported(attribute: &str, value: impl ToString) -> Self {
        DriverError::UnsupportedValue {
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DriverError::DeviceIdentityMismatch {
            expected: "HMC8012".into(),
            actual: "HMC8015".into(),
        };
        assert_eq!(
            err.to_string(),
            "Instrument ID mismatch, expecting HMC8012, got HMC8015"
        );
    }

    #[test]
    fn test_out_of_range_display() {
        let err = DriverError::OutOfRange {
            target: "memory slot".into(),
            index: 6,
            min: 1,
            max: 5,
        };
        assert!(err.to_string().contains("(valid: 1..=5)"));
    }

    #[test]
    fn test_session_error_is_transparent() {
        let err: DriverError = anyhow::anyhow!("VISA read timed out").into();
        assert_eq!(err.to_string(), "VISA read timed out");
    }
}
