//! Rohde & Schwarz HMC8012 digital multimeter
//!
//! The HMC8012 addresses its range settings through a command path that
//! depends on the active measurement function (`SENSe:VOLTage:DC:RANGe`,
//! `SENSe:CURRent:AC:RANGe`, ...). The driver therefore reads the function
//! before building range commands, and switching function invalidates the
//! cached range and auto-range.
//!
//! Functions without a range (continuity, diode, sensor) keep range settings
//! in the cache only.
//!
//! ## Example
//!
//! ```
//! use rust_ivi::capabilities::RangedMeasurement;
//! use rust_ivi::instruments::{Hmc8012, MeasurementFunction};
//! use rust_ivi::session::MockSession;
//!
//! # async fn example() -> rust_ivi::error::DriverResult<()> {
//! let mut dmm = Hmc8012::new(MockSession::simulated())?;
//! dmm.set_measurement_function(MeasurementFunction::AcVolts).await?;
//! // 7 V is not an admitted range; the next one up is used
//! assert_eq!(dmm.set_range(7.0).await?, 40.0);
//! # Ok(())
//! # }
//! ```

use super::{as_bool, as_float, as_text, DeviceError, DriverCore, Identity, InitOptions, ModelInfo};
use crate::attribute::{AttributeSpec, AttributeTable, Choice, Domain, Initial, Value, ValueKind};
use crate::capabilities::{Instrument, MemorySlots, RangedMeasurement};
use crate::error::{DriverError, DriverResult};
use crate::session::Session;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Cached attributes of the HMC8012
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmmAttribute {
    /// Active measurement function
    MeasurementFunction,
    /// Input range of the active function
    Range,
    /// Automatic ranging of the active function
    AutoRange,
    /// A/D conversion rate
    AdcRate,
}

/// Measurement functions of the HMC8012
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementFunction {
    /// DC voltage
    DcVolts,
    /// AC voltage
    AcVolts,
    /// DC current
    DcCurrent,
    /// AC current
    AcCurrent,
    /// Two-wire resistance
    TwoWireResistance,
    /// Four-wire resistance
    FourWireResistance,
    /// Frequency
    Frequency,
    /// Temperature sensor
    Sensor,
    /// Capacitance
    Capacitance,
    /// Continuity test
    Continuity,
    /// Diode test
    Diode,
}

impl MeasurementFunction {
    /// Every function, in table order
    pub const ALL: [MeasurementFunction; 11] = [
        MeasurementFunction::DcVolts,
        MeasurementFunction::AcVolts,
        MeasurementFunction::DcCurrent,
        MeasurementFunction::AcCurrent,
        MeasurementFunction::TwoWireResistance,
        MeasurementFunction::FourWireResistance,
        MeasurementFunction::Frequency,
        MeasurementFunction::Sensor,
        MeasurementFunction::Capacitance,
        MeasurementFunction::Continuity,
        MeasurementFunction::Diode,
    ];

    /// Name used by the attribute cache
    pub fn name(self) -> &'static str {
        match self {
            MeasurementFunction::DcVolts => "dc_volts",
            MeasurementFunction::AcVolts => "ac_volts",
            MeasurementFunction::DcCurrent => "dc_current",
            MeasurementFunction::AcCurrent => "ac_current",
            MeasurementFunction::TwoWireResistance => "two_wire_resistance",
            MeasurementFunction::FourWireResistance => "four_wire_resistance",
            MeasurementFunction::Frequency => "frequency",
            MeasurementFunction::Sensor => "sensor",
            MeasurementFunction::Capacitance => "capacitance",
            MeasurementFunction::Continuity => "continuity",
            MeasurementFunction::Diode => "diode",
        }
    }

    /// Range command path, if the function has a selectable range
    pub fn range_path(self) -> Option<&'static str> {
        match self {
            MeasurementFunction::DcVolts => Some("SENSe:VOLTage:DC:RANGe"),
            MeasurementFunction::AcVolts => Some("SENSe:VOLTage:AC:RANGe"),
            MeasurementFunction::DcCurrent => Some("SENSe:CURRent:DC:RANGe"),
            MeasurementFunction::AcCurrent => Some("SENSe:CURRent:AC:RANGe"),
            MeasurementFunction::TwoWireResistance => Some("SENSe:RESistance:RANGe"),
            MeasurementFunction::FourWireResistance => Some("SENSe:FRESistance:RANGe"),
            MeasurementFunction::Frequency => Some("SENSe:FREQuency:VOLTage:RANGe"),
            MeasurementFunction::Capacitance => Some("SENSe:CAPacitance:RANGe"),
            MeasurementFunction::Sensor
            | MeasurementFunction::Continuity
            | MeasurementFunction::Diode => None,
        }
    }

    /// Auto-range command path, if the function supports automatic ranging
    pub fn auto_range_path(self) -> Option<&'static str> {
        match self {
            MeasurementFunction::DcVolts => Some("SENSe:VOLTage:DC:RANGe:AUTO"),
            MeasurementFunction::AcVolts => Some("SENSe:VOLTage:AC:RANGe:AUTO"),
            MeasurementFunction::DcCurrent => Some("SENSe:CURRent:DC:RANGe:AUTO"),
            MeasurementFunction::AcCurrent => Some("SENSe:CURRent:AC:RANGe:AUTO"),
            MeasurementFunction::TwoWireResistance => Some("SENSe:RESistance:RANGe:AUTO"),
            MeasurementFunction::FourWireResistance => Some("SENSe:FRESistance:RANGe:AUTO"),
            MeasurementFunction::Capacitance => Some("SENSe:CAPacitance:RANGe:AUTO"),
            MeasurementFunction::Frequency
            | MeasurementFunction::Sensor
            | MeasurementFunction::Continuity
            | MeasurementFunction::Diode => None,
        }
    }
}

impl fmt::Display for MeasurementFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MeasurementFunction {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MeasurementFunction::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DriverError::unsupported("measurement_function", s))
    }
}

/// Voltage range ladder in volts
pub const RANGE_LADDER: &[f64] = &[0.4, 4.0, 40.0, 400.0, 1000.0];

const FUNCTIONS: &[Choice] = &[
    Choice::new("dc_volts", "VOLTage:DC"),
    Choice::new("ac_volts", "VOLTage:AC"),
    Choice::new("dc_current", "CURRent:DC"),
    Choice::new("ac_current", "CURRent:AC"),
    Choice::new("two_wire_resistance", "RESistance"),
    Choice::new("four_wire_resistance", "FRESistance"),
    Choice::new("frequency", "FREQuency"),
    Choice::new("sensor", "SENSor"),
    Choice::new("capacitance", "CAPacitance"),
    Choice::new("continuity", "CONTinuity"),
    Choice::new("diode", "DIODe"),
];

const ADC_RATES: &[Choice] = &[Choice::same("SLOW"), Choice::same("MED"), Choice::same("FAST")];

static ATTRIBUTES: &[AttributeSpec<DmmAttribute>] = &[
    AttributeSpec {
        id: DmmAttribute::MeasurementFunction,
        name: "measurement_function",
        kind: ValueKind::Text,
        query: Some("SENSe:FUNCtion?"),
        command: Some("SENSe:FUNCtion"),
        domain: Domain::Closed(FUNCTIONS),
        invalidates: &[DmmAttribute::Range, DmmAttribute::AutoRange],
        indexed: false,
        derived: None,
        initial: Initial::Text("dc_volts"),
    },
    AttributeSpec {
        id: DmmAttribute::Range,
        name: "range",
        kind: ValueKind::Float,
        query: Some("{range_path}"),
        command: Some("{range_path}"),
        domain: Domain::Ladder(RANGE_LADDER),
        invalidates: &[],
        indexed: false,
        derived: None,
        initial: Initial::Float(1000.0),
    },
    AttributeSpec {
        id: DmmAttribute::AutoRange,
        name: "auto_range",
        kind: ValueKind::Bool,
        query: Some("{auto_range_path}"),
        command: Some("{auto_range_path}"),
        domain: Domain::Any,
        invalidates: &[],
        indexed: false,
        derived: None,
        initial: Initial::Bool(true),
    },
    AttributeSpec {
        id: DmmAttribute::AdcRate,
        name: "ADC_rate",
        kind: ValueKind::Text,
        query: Some("SENSe:ADCRate?"),
        command: Some("SENSe:ADCRate"),
        domain: Domain::Closed(ADC_RATES),
        invalidates: &[],
        indexed: false,
        derived: None,
        initial: Initial::Text("FAST"),
    },
];

const INFO: ModelInfo = ModelInfo {
    expected_model: "HMC8012",
    manufacturer: "Rohde Schwarz Technologies",
    model: "HMC8012",
    memory_size: 5,
};

/// HMC8012 driver
pub struct Hmc8012 {
    core: DriverCore<DmmAttribute>,
    memory_names: HashMap<usize, String>,
}

impl Hmc8012 {
    /// Build a driver on `session`. No I/O is performed until the first access.
    pub fn new(session: impl Session + 'static) -> DriverResult<Self> {
        Self::from_boxed(Box::new(session))
    }

    pub(crate) fn from_boxed(session: Box<dyn Session>) -> DriverResult<Self> {
        let table = AttributeTable::new(ATTRIBUTES)?;
        Ok(Self {
            core: DriverCore::new(session, table, &[], INFO),
            memory_names: HashMap::new(),
        })
    }

    /// Active measurement function
    pub async fn measurement_function(&mut self) -> DriverResult<MeasurementFunction> {
        let value = self
            .core
            .get(DmmAttribute::MeasurementFunction, None, &[])
            .await?;
        as_text("measurement_function", value)?.parse()
    }

    /// Switch measurement function. Cached range settings become stale.
    pub async fn set_measurement_function(
        &mut self,
        function: MeasurementFunction,
    ) -> DriverResult<()> {
        self.core
            .set(DmmAttribute::MeasurementFunction, function.name(), None, &[])
            .await?;
        Ok(())
    }

    /// A/D conversion rate (`SLOW`, `MED` or `FAST`)
    pub async fn adc_rate(&mut self) -> DriverResult<String> {
        let value = self.core.get(DmmAttribute::AdcRate, None, &[]).await?;
        as_text("ADC_rate", value)
    }

    /// Set the A/D conversion rate; matching is case-insensitive
    pub async fn set_adc_rate(&mut self, rate: &str) -> DriverResult<()> {
        self.core.set(DmmAttribute::AdcRate, rate, None, &[]).await?;
        Ok(())
    }

    /// Name stored with memory `slot`
    pub async fn memory_name(&mut self, slot: usize) -> DriverResult<String> {
        self.core.check_slot(slot)?;
        if self.core.simulate() {
            return Ok(self.memory_names.get(&slot).cloned().unwrap_or_default());
        }
        let reply = self
            .core
            .session
            .ask(&format!("memory:state:name? {}", slot))
            .await?;
        Ok(reply.trim_matches(|c| c == ' ' || c == '"').to_string())
    }

    /// Rename memory `slot`
    pub async fn set_memory_name(&mut self, slot: usize, name: &str) -> DriverResult<()> {
        self.core.check_slot(slot)?;
        self.core
            .write(&format!("memory:state:name {}, \"{}\"", slot, name))
            .await?;
        self.memory_names.insert(slot, name.to_string());
        Ok(())
    }

    /// Cached value of `attr` without I/O
    fn cached(&self, attr: DmmAttribute) -> DriverResult<Value> {
        self.core.cache.peek(attr, None).cloned().ok_or_else(|| {
            DriverError::InvalidAttributeTable(format!("no cache entry for {:?}", attr))
        })
    }
}

#[async_trait]
impl RangedMeasurement for Hmc8012 {
    async fn range(&mut self) -> DriverResult<f64> {
        let function = self.measurement_function().await?;
        let value = match function.range_path() {
            Some(path) => {
                self.core
                    .get(DmmAttribute::Range, None, &[("range_path", path.to_string())])
                    .await?
            }
            None => self.cached(DmmAttribute::Range)?,
        };
        as_float("range", value)
    }

    async fn set_range(&mut self, range: f64) -> DriverResult<f64> {
        let admitted = self.core.cache.admit(DmmAttribute::Range, range)?;
        let function = self.measurement_function().await?;

        let value = match function.range_path() {
            Some(path) => {
                let vars = [("range_path", path.to_string())];
                self.core
                    .cache
                    .write_admitted(&*self.core.session, admitted, None, &vars)
                    .await?
            }
            None => {
                debug!(%function, "function has no range, caching locally");
                self.core.cache.commit_local(admitted, None)?
            }
        };
        as_float("range", value)
    }

    async fn auto_range(&mut self) -> DriverResult<bool> {
        let function = self.measurement_function().await?;
        let value = match function.auto_range_path() {
            Some(path) => {
                self.core
                    .get(
                        DmmAttribute::AutoRange,
                        None,
                        &[("auto_range_path", path.to_string())],
                    )
                    .await?
            }
            None => self.cached(DmmAttribute::AutoRange)?,
        };
        as_bool("auto_range", value)
    }

    async fn set_auto_range(&mut self, enabled: bool) -> DriverResult<()> {
        let admitted = self.core.cache.admit(DmmAttribute::AutoRange, enabled)?;
        let function = self.measurement_function().await?;

        match function.auto_range_path() {
            Some(path) => {
                let vars = [("auto_range_path", path.to_string())];
                self.core
                    .cache
                    .write_admitted(&*self.core.session, admitted, None, &vars)
                    .await?;
            }
            None => {
                self.core.cache.commit_local(admitted, None)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Instrument for Hmc8012 {
    async fn initialize(&mut self, options: InitOptions) -> DriverResult<()> {
        self.core.initialize(options).await
    }

    async fn identity(&mut self) -> DriverResult<Identity> {
        self.core.identity().await
    }

    async fn reset(&mut self) -> DriverResult<()> {
        self.core.reset().await
    }

    async fn error_query(&mut self) -> DriverResult<DeviceError> {
        self.core.error_query().await
    }

    async fn self_test(&mut self) -> DriverResult<i32> {
        self.core.self_test().await
    }

    fn invalidate_all(&mut self) {
        self.core.cache.invalidate_all();
    }
}

#[async_trait]
impl MemorySlots for Hmc8012 {
    fn memory_size(&self) -> usize {
        self.core.memory_size()
    }

    async fn save(&mut self, slot: usize) -> DriverResult<()> {
        self.core.save(slot).await
    }

    async fn recall(&mut self, slot: usize) -> DriverResult<()> {
        self.core.recall(slot).await
    }
}
