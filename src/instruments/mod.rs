//! Instrument drivers
//!
//! Each driver pairs a static attribute table with a [`DriverCore`], which owns
//! the session, the attribute cache and the IEEE 488.2 common commands both
//! instruments share (`*IDN?`, `*RST`, `*SAV`/`*RCL`, `SYST:ERR?`, `*TST?`).
//!
//! Drivers are opened either directly from a session or from an
//! [`InstrumentDefinition`] loaded from configuration:
//!
//! ```no_run
//! use rust_ivi::config::IviConfig;
//! use rust_ivi::instruments;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = IviConfig::load()?;
//! for def in config.instruments_of(rust_ivi::config::InstrumentKind::Hmc8012) {
//!     let mut dmm = instruments::open_multimeter(def).await?;
//!     println!("{:?}", dmm.measurement_function().await?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod hmc8012;
pub mod hmo1002;

pub use hmc8012::{DmmAttribute, Hmc8012, MeasurementFunction};
pub use hmo1002::{Hmo1002, PassFailCounts, ScopeAttribute, TimebaseReference};

use crate::attribute::{AttributeId, AttributeTable, CachedAttributes, Value};
use crate::capabilities::Instrument;
use crate::config::{InstrumentDefinition, InstrumentKind};
use crate::error::{DriverError, DriverResult};
use crate::session::{MockSession, Session, VisaSession};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Parsed `*IDN?` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Manufacturer field
    pub manufacturer: String,
    /// Model field
    pub model: String,
    /// Serial number field
    pub serial: String,
    /// Firmware revision field
    pub firmware: String,
}

impl Identity {
    /// Parse `manufacturer,model,serial,firmware`.
    ///
    /// Trailing fields may be missing; a reply without a model is rejected.
    pub fn parse(reply: &str) -> DriverResult<Self> {
        let mut fields = reply.trim().split(',').map(|f| f.trim().to_string());
        let manufacturer = fields.next().unwrap_or_default();
        let model = fields.next().filter(|m| !m.is_empty()).ok_or_else(|| DriverError::Parse {
            attribute: "identity".to_string(),
            reply: reply.to_string(),
        })?;

        Ok(Self {
            manufacturer,
            model,
            serial: fields.next().unwrap_or_default(),
            firmware: fields.next().unwrap_or_default(),
        })
    }
}

/// Options for [`crate::capabilities::Instrument::initialize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOptions {
    /// Check the model reported by `*IDN?`
    pub id_query: bool,
    /// Send `*RST` after connecting
    pub reset: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            id_query: true,
            reset: false,
        }
    }
}

/// One entry of the instrument error queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    /// SCPI error code (0 means no error)
    pub code: i32,
    /// Error text without quotes
    pub message: String,
}

impl DeviceError {
    fn parse(reply: &str) -> DriverResult<Self> {
        let (code, message) = reply.split_once(',').unwrap_or((reply, ""));
        let code = code.trim().parse().map_err(|_| DriverError::Parse {
            attribute: "error_query".to_string(),
            reply: reply.to_string(),
        })?;
        Ok(Self {
            code,
            message: message.trim().trim_matches('"').to_string(),
        })
    }
}

/// Fixed facts about a driver model
#[derive(Debug, Clone, Copy)]
pub(crate) struct ModelInfo {
    /// Prefix the `*IDN?` model must start with
    pub expected_model: &'static str,
    /// Manufacturer reported in simulate mode
    pub manufacturer: &'static str,
    /// Model reported in simulate mode
    pub model: &'static str,
    /// Number of `*SAV`/`*RCL` slots (numbered from 1)
    pub memory_size: usize,
}

/// State shared by every driver: session, cache and identity
pub(crate) struct DriverCore<A: 'static> {
    pub session: Box<dyn Session>,
    pub cache: CachedAttributes<A>,
    info: ModelInfo,
    identity: Option<Identity>,
}

impl<A: AttributeId> DriverCore<A> {
    pub fn new(
        session: Box<dyn Session>,
        table: AttributeTable<A>,
        channels: &[&str],
        info: ModelInfo,
    ) -> Self {
        Self {
            session,
            cache: CachedAttributes::new(table, channels),
            info,
            identity: None,
        }
    }

    pub fn simulate(&self) -> bool {
        self.session.simulate()
    }

    pub fn memory_size(&self) -> usize {
        self.info.memory_size
    }

    pub async fn get(
        &mut self,
        attr: A,
        index: Option<usize>,
        vars: &[(&str, String)],
    ) -> DriverResult<Value> {
        self.cache.get(&*self.session, attr, index, vars).await
    }

    pub async fn set(
        &mut self,
        attr: A,
        value: impl Into<Value> + Send,
        index: Option<usize>,
        vars: &[(&str, String)],
    ) -> DriverResult<Value> {
        self.cache
            .set(&*self.session, attr, value, index, vars)
            .await
    }

    /// Send a command unless simulating
    pub async fn write(&self, command: &str) -> DriverResult<()> {
        if !self.simulate() {
            self.session.write(command).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(model = self.info.expected_model))]
    pub async fn initialize(&mut self, options: InitOptions) -> DriverResult<()> {
        if !self.simulate() {
            self.session.clear().await?;
        }

        if options.id_query && !self.simulate() {
            let identity = self.identity().await?;
            if !identity.model.starts_with(self.info.expected_model) {
                return Err(DriverError::DeviceIdentityMismatch {
                    expected: self.info.expected_model.to_string(),
                    actual: identity.model,
                });
            }
        }

        if options.reset {
            self.reset().await?;
        }

        info!(simulate = self.simulate(), "instrument initialized");
        Ok(())
    }

    pub async fn identity(&mut self) -> DriverResult<Identity> {
        if self.simulate() {
            return Ok(Identity {
                manufacturer: self.info.manufacturer.to_string(),
                model: self.info.model.to_string(),
                serial: String::new(),
                firmware: String::new(),
            });
        }
        if let Some(identity) = &self.identity {
            return Ok(identity.clone());
        }

        let identity = Identity::parse(&self.session.ask("*IDN?").await?)?;
        debug!(?identity, "identity read");
        self.identity = Some(identity.clone());
        Ok(identity)
    }

    pub async fn reset(&mut self) -> DriverResult<()> {
        self.write("*RST").await?;
        self.cache.invalidate_all();
        Ok(())
    }

    pub async fn error_query(&mut self) -> DriverResult<DeviceError> {
        if self.simulate() {
            return Ok(DeviceError {
                code: 0,
                message: "No error".to_string(),
            });
        }
        DeviceError::parse(&self.session.ask("SYST:ERR?").await?)
    }

    pub async fn self_test(&mut self) -> DriverResult<i32> {
        if self.simulate() {
            return Ok(0);
        }
        let reply = self.session.ask("*TST?").await?;
        reply.trim().parse().map_err(|_| DriverError::Parse {
            attribute: "self_test".to_string(),
            reply,
        })
    }

    pub fn check_slot(&self, slot: usize) -> DriverResult<()> {
        if slot < 1 || slot > self.info.memory_size {
            return Err(DriverError::OutOfRange {
                target: "memory slot".to_string(),
                index: slot,
                min: 1,
                max: self.info.memory_size,
            });
        }
        Ok(())
    }

    pub async fn save(&mut self, slot: usize) -> DriverResult<()> {
        self.check_slot(slot)?;
        self.write(&format!("*SAV {}", slot)).await
    }

    pub async fn recall(&mut self, slot: usize) -> DriverResult<()> {
        self.check_slot(slot)?;
        self.write(&format!("*RCL {}", slot)).await?;
        self.cache.invalidate_all();
        Ok(())
    }
}

pub(crate) fn as_float(attribute: &str, value: Value) -> DriverResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| DriverError::unsupported(attribute, &value))
}

pub(crate) fn as_bool(attribute: &str, value: Value) -> DriverResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| DriverError::unsupported(attribute, &value))
}

pub(crate) fn as_text(attribute: &str, value: Value) -> DriverResult<String> {
    match value {
        Value::Text(text) => Ok(text),
        other => Err(DriverError::unsupported(attribute, &other)),
    }
}

/// Open the session described by `def`
async fn open_session(def: &InstrumentDefinition) -> DriverResult<Box<dyn Session>> {
    if def.simulate {
        debug!(id = %def.id, "opening simulated session");
        return Ok(Box::new(MockSession::simulated()));
    }
    let session = VisaSession::open(&def.resource, Duration::from_millis(def.timeout_ms)).await?;
    Ok(Box::new(session))
}

fn check_kind(def: &InstrumentDefinition, kind: InstrumentKind) -> DriverResult<()> {
    if def.kind != kind {
        return Err(DriverError::unsupported("type", format!("{:?}", def.kind)));
    }
    Ok(())
}

/// Open and initialize the multimeter described by `def`
pub async fn open_multimeter(def: &InstrumentDefinition) -> DriverResult<Hmc8012> {
    check_kind(def, InstrumentKind::Hmc8012)?;
    let mut dmm = Hmc8012::from_boxed(open_session(def).await?)?;
    dmm.initialize(def.init_options()).await?;
    Ok(dmm)
}

/// Open and initialize the oscilloscope described by `def`
pub async fn open_oscilloscope(def: &InstrumentDefinition) -> DriverResult<Hmo1002> {
    check_kind(def, InstrumentKind::Hmo1002)?;
    let mut scope = Hmo1002::from_boxed(open_session(def).await?)?;
    scope.initialize(def.init_options()).await?;
    Ok(scope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_parse() {
        let id = Identity::parse("Rohde&Schwarz,HMC8012,021234567,01.201\n").unwrap();
        assert_eq!(id.manufacturer, "Rohde&Schwarz");
        assert_eq!(id.model, "HMC8012");
        assert_eq!(id.serial, "021234567");
        assert_eq!(id.firmware, "01.201");
    }

    #[test]
    fn test_identity_parse_short_reply() {
        let id = Identity::parse("HAMEG,HMO1002").unwrap();
        assert_eq!(id.model, "HMO1002");
        assert!(id.serial.is_empty());
        assert!(Identity::parse("garbage").is_err());
    }

    #[test]
    fn test_device_error_parse() {
        let err = DeviceError::parse("-113,\"Undefined header\"").unwrap();
        assert_eq!(err.code, -113);
        assert_eq!(err.message, "Undefined header");
        assert_eq!(DeviceError::parse("0").unwrap().code, 0);
        assert!(DeviceError::parse("oops,\"x\"").is_err());
    }

    #[test]
    fn test_init_options_default() {
        let options = InitOptions::default();
        assert!(options.id_query);
        assert!(!options.reset);
    }
}
