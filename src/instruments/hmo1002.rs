//! Rohde & Schwarz HMO1002 oscilloscope
//!
//! Timebase and per-channel vertical settings are cached. Range and scale of
//! the same axis are one quantity in two units (`range = scale * divisions`),
//! so reading either also fills in the other when it is stale, and writing
//! either makes the other stale.
//!
//! Besides the cached settings the driver exposes the mask (pass/fail) test
//! counters, auto setup, setup memories and binary transfer of the complete
//! instrument setup.

use super::{as_float, as_text, DeviceError, DriverCore, Identity, InitOptions, ModelInfo};
use crate::attribute::{AttributeSpec, AttributeTable, Choice, Derived, Domain, Initial, ValueKind};
use crate::capabilities::{ChannelVertical, Instrument, MemorySlots};
use crate::error::{DriverError, DriverResult};
use crate::session::Session;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Horizontal divisions on screen
pub const HORIZONTAL_DIVISIONS: f64 = 10.0;

/// Vertical divisions on screen
pub const VERTICAL_DIVISIONS: f64 = 8.0;

/// Analog bandwidth in Hz
pub const BANDWIDTH: f64 = 1e9;

/// Analog channels; cached vertical settings are indexed by position here
pub const ANALOG_CHANNELS: &[&str] = &["channel1", "channel2"];

/// Logic channels of the mixed-signal option
pub const DIGITAL_CHANNELS: &[&str] = &[
    "digital0", "digital1", "digital2", "digital3", "digital4", "digital5", "digital6",
    "digital7", "digital8", "digital9", "digital10", "digital11", "digital12", "digital13",
    "digital14", "digital15",
];

/// Cached attributes of the HMO1002
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeAttribute {
    /// Trigger to reference point delay
    TimebasePosition,
    /// Full-scale horizontal time of the main window
    TimebaseRange,
    /// Time per division of the main window
    TimebaseScale,
    /// Reference point on screen
    TimebaseReference,
    /// Zoom window position
    WindowPosition,
    /// Zoom window full-scale time
    WindowRange,
    /// Zoom window time per division
    WindowScale,
    /// Full-scale vertical range, per channel
    ChannelRange,
    /// Volts per division, per channel
    ChannelScale,
    /// Vertical offset, per channel
    ChannelOffset,
}

/// Timebase reference point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimebaseReference {
    /// Left edge of the screen
    Left,
    /// Center of the screen
    Center,
    /// Right edge of the screen
    Right,
}

impl TimebaseReference {
    /// Name used by the attribute cache
    pub fn name(self) -> &'static str {
        match self {
            TimebaseReference::Left => "left",
            TimebaseReference::Center => "center",
            TimebaseReference::Right => "right",
        }
    }
}

impl fmt::Display for TimebaseReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TimebaseReference {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            TimebaseReference::Left,
            TimebaseReference::Center,
            TimebaseReference::Right,
        ]
        .into_iter()
        .find(|r| r.name().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| DriverError::unsupported("timebase_reference", s))
    }
}

/// Mask test counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassFailCounts {
    /// Acquisitions tested
    pub total: i64,
    /// Acquisitions violating the mask
    pub failed: i64,
    /// `total - failed`
    pub passed: i64,
}

const REFERENCES: &[Choice] = &[
    Choice::new("left", "LEFT"),
    Choice::new("center", "CENTer"),
    Choice::new("right", "RIGHt"),
];

const WINDOW: &[ScopeAttribute] = &[ScopeAttribute::WindowScale, ScopeAttribute::WindowRange];

static ATTRIBUTES: &[AttributeSpec<ScopeAttribute>] = &[
    AttributeSpec {
        invalidates: &[ScopeAttribute::WindowPosition],
        ..AttributeSpec::float(
            ScopeAttribute::TimebasePosition,
            "timebase_position",
            "timebase:position",
            Initial::Float(0.0),
        )
    },
    AttributeSpec {
        invalidates: WINDOW,
        derived: Some(Derived {
            partner: ScopeAttribute::TimebaseScale,
            factor: 1.0 / HORIZONTAL_DIVISIONS,
        }),
        ..AttributeSpec::float(
            ScopeAttribute::TimebaseRange,
            "timebase_range",
            "timebase:range",
            Initial::Float(1e-3),
        )
    },
    AttributeSpec {
        invalidates: WINDOW,
        derived: Some(Derived {
            partner: ScopeAttribute::TimebaseRange,
            factor: HORIZONTAL_DIVISIONS,
        }),
        ..AttributeSpec::float(
            ScopeAttribute::TimebaseScale,
            "timebase_scale",
            "timebase:scale",
            Initial::Float(100e-6),
        )
    },
    AttributeSpec {
        kind: ValueKind::Text,
        domain: Domain::Closed(REFERENCES),
        ..AttributeSpec::float(
            ScopeAttribute::TimebaseReference,
            "timebase_reference",
            "timebase:reference",
            Initial::Text("center"),
        )
    },
    AttributeSpec::float(
        ScopeAttribute::WindowPosition,
        "timebase_window_position",
        "timebase:window:position",
        Initial::Float(0.0),
    ),
    AttributeSpec {
        derived: Some(Derived {
            partner: ScopeAttribute::WindowScale,
            factor: 1.0 / HORIZONTAL_DIVISIONS,
        }),
        ..AttributeSpec::float(
            ScopeAttribute::WindowRange,
            "timebase_window_range",
            "timebase:window:range",
            Initial::Float(5e-6),
        )
    },
    AttributeSpec {
        derived: Some(Derived {
            partner: ScopeAttribute::WindowRange,
            factor: HORIZONTAL_DIVISIONS,
        }),
        ..AttributeSpec::float(
            ScopeAttribute::WindowScale,
            "timebase_window_scale",
            "timebase:window:scale",
            Initial::Float(500e-9),
        )
    },
    AttributeSpec {
        indexed: true,
        invalidates: &[ScopeAttribute::ChannelOffset],
        derived: Some(Derived {
            partner: ScopeAttribute::ChannelScale,
            factor: 1.0 / VERTICAL_DIVISIONS,
        }),
        ..AttributeSpec::float(
            ScopeAttribute::ChannelRange,
            "channel_range",
            ":{channel}:range",
            Initial::Float(8.0),
        )
    },
    AttributeSpec {
        indexed: true,
        invalidates: &[ScopeAttribute::ChannelOffset],
        derived: Some(Derived {
            partner: ScopeAttribute::ChannelRange,
            factor: VERTICAL_DIVISIONS,
        }),
        ..AttributeSpec::float(
            ScopeAttribute::ChannelScale,
            "channel_scale",
            ":{channel}:scale",
            Initial::Float(1.0),
        )
    },
    AttributeSpec {
        indexed: true,
        ..AttributeSpec::float(
            ScopeAttribute::ChannelOffset,
            "channel_offset",
            ":{channel}:offset",
            Initial::Float(0.0),
        )
    },
];

const INFO: ModelInfo = ModelInfo {
    expected_model: "HMO",
    manufacturer: "Rohde Schwarz Technologies",
    model: "HMO1002",
    memory_size: 10,
};

/// HMO1002 driver
pub struct Hmo1002 {
    core: DriverCore<ScopeAttribute>,
}

impl Hmo1002 {
    /// Build a driver on `session`. No I/O is performed until the first access.
    pub fn new(session: impl Session + 'static) -> DriverResult<Self> {
        Self::from_boxed(Box::new(session))
    }

    pub(crate) fn from_boxed(session: Box<dyn Session>) -> DriverResult<Self> {
        let table = AttributeTable::new(ATTRIBUTES)?;
        Ok(Self {
            core: DriverCore::new(session, table, ANALOG_CHANNELS, INFO),
        })
    }

    /// Index of the channel called `name` (analog channels first, then digital)
    pub fn channel_index(&self, name: &str) -> DriverResult<usize> {
        ANALOG_CHANNELS
            .iter()
            .chain(DIGITAL_CHANNELS)
            .position(|c| c.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| DriverError::OutOfRange {
                target: format!("channel '{}'", name),
                index: ANALOG_CHANNELS.len() + DIGITAL_CHANNELS.len(),
                min: 0,
                max: ANALOG_CHANNELS.len() + DIGITAL_CHANNELS.len() - 1,
            })
    }

    /// Analog bandwidth in Hz
    pub fn bandwidth(&self) -> f64 {
        BANDWIDTH
    }

    async fn float(&mut self, attr: ScopeAttribute, index: Option<usize>) -> DriverResult<f64> {
        let name = self.core.cache.table().spec(attr)?.name;
        let value = self.core.get(attr, index, &[]).await?;
        as_float(name, value)
    }

    async fn set_float(
        &mut self,
        attr: ScopeAttribute,
        value: f64,
        index: Option<usize>,
    ) -> DriverResult<()> {
        self.core.set(attr, value, index, &[]).await?;
        Ok(())
    }

    /// Delay between trigger and reference point in seconds
    pub async fn timebase_position(&mut self) -> DriverResult<f64> {
        self.float(ScopeAttribute::TimebasePosition, None).await
    }

    /// Set the trigger delay; the zoom window position becomes stale
    pub async fn set_timebase_position(&mut self, seconds: f64) -> DriverResult<()> {
        self.set_float(ScopeAttribute::TimebasePosition, seconds, None)
            .await
    }

    /// Full-scale horizontal time in seconds (10 divisions)
    pub async fn timebase_range(&mut self) -> DriverResult<f64> {
        self.float(ScopeAttribute::TimebaseRange, None).await
    }

    /// Set the full-scale horizontal time
    pub async fn set_timebase_range(&mut self, seconds: f64) -> DriverResult<()> {
        self.set_float(ScopeAttribute::TimebaseRange, seconds, None)
            .await
    }

    /// Seconds per division
    pub async fn timebase_scale(&mut self) -> DriverResult<f64> {
        self.float(ScopeAttribute::TimebaseScale, None).await
    }

    /// Set seconds per division
    pub async fn set_timebase_scale(&mut self, seconds: f64) -> DriverResult<()> {
        self.set_float(ScopeAttribute::TimebaseScale, seconds, None)
            .await
    }

    /// Reference point the position is measured from
    pub async fn timebase_reference(&mut self) -> DriverResult<TimebaseReference> {
        let value = self
            .core
            .get(ScopeAttribute::TimebaseReference, None, &[])
            .await?;
        as_text("timebase_reference", value)?.parse()
    }

    /// Move the reference point
    pub async fn set_timebase_reference(&mut self, reference: TimebaseReference) -> DriverResult<()> {
        self.core
            .set(ScopeAttribute::TimebaseReference, reference.name(), None, &[])
            .await?;
        Ok(())
    }

    /// Zoom window position in seconds
    pub async fn timebase_window_position(&mut self) -> DriverResult<f64> {
        self.float(ScopeAttribute::WindowPosition, None).await
    }

    /// Set the zoom window position
    pub async fn set_timebase_window_position(&mut self, seconds: f64) -> DriverResult<()> {
        self.set_float(ScopeAttribute::WindowPosition, seconds, None)
            .await
    }

    /// Zoom window full-scale time in seconds
    pub async fn timebase_window_range(&mut self) -> DriverResult<f64> {
        self.float(ScopeAttribute::WindowRange, None).await
    }

    /// Set the zoom window full-scale time
    pub async fn set_timebase_window_range(&mut self, seconds: f64) -> DriverResult<()> {
        self.set_float(ScopeAttribute::WindowRange, seconds, None)
            .await
    }

    /// Zoom window seconds per division
    pub async fn timebase_window_scale(&mut self) -> DriverResult<f64> {
        self.float(ScopeAttribute::WindowScale, None).await
    }

    /// Set zoom window seconds per division
    pub async fn set_timebase_window_scale(&mut self, seconds: f64) -> DriverResult<()> {
        self.set_float(ScopeAttribute::WindowScale, seconds, None)
            .await
    }

    /// Let the instrument pick timebase, vertical and trigger settings
    pub async fn auto_setup(&mut self) -> DriverResult<()> {
        self.core.write(":autoscale").await?;
        self.core.cache.invalidate_all();
        info!("auto setup performed");
        Ok(())
    }

    /// Reset the mask test counters
    pub async fn passfail_clear(&mut self) -> DriverResult<()> {
        self.core.write("mask:res:coun").await
    }

    /// Start the mask test
    pub async fn passfail_start(&mut self) -> DriverResult<()> {
        self.core.write("mask:test run").await
    }

    /// Stop the mask test
    pub async fn passfail_stop(&mut self) -> DriverResult<()> {
        self.core.write("mask:test stop").await
    }

    /// Number of acquisitions tested against the mask
    pub async fn passfail_total(&mut self) -> DriverResult<i64> {
        self.count("passfail_total", ":mask:coun?").await
    }

    /// Number of acquisitions that violated the mask
    pub async fn passfail_failed(&mut self) -> DriverResult<i64> {
        self.count("passfail_failed", ":mask:vco?").await
    }

    /// Number of acquisitions that stayed inside the mask
    pub async fn passfail_passed(&mut self) -> DriverResult<i64> {
        Ok(self.passfail_counts().await?.passed)
    }

    /// All mask counters; never cached since the test runs on its own
    pub async fn passfail_counts(&mut self) -> DriverResult<PassFailCounts> {
        let total = self.passfail_total().await?;
        let failed = self.passfail_failed().await?;
        let passed = total
            .checked_sub(failed)
            .ok_or_else(|| DriverError::Parse {
                attribute: "passfail_passed".to_string(),
                reply: format!("total {total}, failed {failed}"),
            })?;
        Ok(PassFailCounts {
            total,
            failed,
            passed,
        })
    }

    async fn count(&mut self, name: &str, query: &str) -> DriverResult<i64> {
        if self.core.simulate() {
            return Ok(0);
        }
        let reply = self.core.session.ask(query).await?;
        ValueKind::Int
            .parse(&reply)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| DriverError::Parse {
                attribute: name.to_string(),
                reply,
            })
    }

    /// Complete instrument setup as an opaque binary blob (empty when simulated)
    pub async fn fetch_setup(&mut self) -> DriverResult<Vec<u8>> {
        if self.core.simulate() {
            return Ok(Vec::new());
        }
        self.core.session.write("SYST:SET?").await?;
        let setup = self.core.session.read_block().await?;
        debug!(bytes = setup.len(), "setup fetched");
        Ok(setup)
    }

    /// Restore a setup from [`Hmo1002::fetch_setup`]. Every cached value becomes stale.
    pub async fn load_setup(&mut self, setup: &[u8]) -> DriverResult<()> {
        if self.core.simulate() {
            return Ok(());
        }
        self.core.session.write_block(setup, "SYST:SET ").await?;
        self.core.cache.invalidate_all();
        debug!(bytes = setup.len(), "setup loaded");
        Ok(())
    }
}

#[async_trait]
impl ChannelVertical for Hmo1002 {
    fn channel_count(&self) -> usize {
        self.core.cache.index_count()
    }

    async fn channel_range(&mut self, index: usize) -> DriverResult<f64> {
        self.float(ScopeAttribute::ChannelRange, Some(index)).await
    }

    async fn set_channel_range(&mut self, index: usize, range: f64) -> DriverResult<()> {
        self.set_float(ScopeAttribute::ChannelRange, range, Some(index))
            .await
    }

    async fn channel_scale(&mut self, index: usize) -> DriverResult<f64> {
        self.float(ScopeAttribute::ChannelScale, Some(index)).await
    }

    async fn set_channel_scale(&mut self, index: usize, scale: f64) -> DriverResult<()> {
        self.set_float(ScopeAttribute::ChannelScale, scale, Some(index))
            .await
    }

    async fn channel_offset(&mut self, index: usize) -> DriverResult<f64> {
        self.float(ScopeAttribute::ChannelOffset, Some(index)).await
    }

    async fn set_channel_offset(&mut self, index: usize, offset: f64) -> DriverResult<()> {
        self.set_float(ScopeAttribute::ChannelOffset, offset, Some(index))
            .await
    }
}

#[async_trait]
impl Instrument for Hmo1002 {
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
impl MemorySlots for Hmo1002 {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MockSession;

    #[test]
    fn test_attribute_table_is_valid() {
        assert!(AttributeTable::new(ATTRIBUTES).is_ok());
    }

    #[test]
    fn test_channel_lookup() {
        let scope = Hmo1002::new(MockSession::simulated()).unwrap();
        assert_eq!(scope.channel_index("channel2").unwrap(), 1);
        assert_eq!(scope.channel_index("DIGITAL0").unwrap(), 2);
        assert_eq!(scope.channel_index("digital15").unwrap(), 17);
        assert!(matches!(
            scope.channel_index("channel3"),
            Err(DriverError::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_simulated_defaults() {
        let mut scope = Hmo1002::new(MockSession::simulated()).unwrap();
        assert_eq!(scope.timebase_range().await.unwrap(), 1e-3);
        assert_eq!(scope.timebase_scale().await.unwrap(), 100e-6);
        assert_eq!(
            scope.timebase_reference().await.unwrap(),
            TimebaseReference::Center
        );
        assert_eq!(scope.channel_range(1).await.unwrap(), 8.0);
        assert_eq!(scope.passfail_counts().await.unwrap().passed, 0);
        assert!(scope.fetch_setup().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reading_range_fills_scale() {
        let session = MockSession::new().with_reply("timebase:range?", "2.000000E-02");
        let mut scope = Hmo1002::new(session.clone()).unwrap();

        assert_eq!(scope.timebase_range().await.unwrap(), 2e-2);
        let scale = scope.timebase_scale().await.unwrap();

        assert!((scale - 2e-3).abs() < 1e-15);
        assert_eq!(session.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_reference_reply_in_short_form() {
        let session = MockSession::new().with_reply("timebase:reference?", "RIGH");
        let mut scope = Hmo1002::new(session).unwrap();
        assert_eq!(
            scope.timebase_reference().await.unwrap(),
            TimebaseReference::Right
        );
    }

    #[tokio::test]
    async fn test_set_reference_sends_token() {
        let session = MockSession::new();
        let mut scope = Hmo1002::new(session.clone()).unwrap();
        scope
            .set_timebase_reference(TimebaseReference::Left)
            .await
            .unwrap();
        assert_eq!(session.writes(), vec!["timebase:reference LEFT"]);
    }

    #[tokio::test]
    async fn test_position_invalidates_window_position() {
        let session = MockSession::new().with_reply("timebase:window:position?", "0");
        let mut scope = Hmo1002::new(session.clone()).unwrap();
        scope.timebase_window_position().await.unwrap();

        scope.set_timebase_position(1e-3).await.unwrap();
        scope.timebase_window_position().await.unwrap();

        assert_eq!(session.round_trips(), 2);
    }

    #[tokio::test]
    async fn test_passfail_counts() {
        let session = MockSession::new()
            .with_reply(":mask:coun?", "120")
            .with_reply(":mask:vco?", "7");
        let mut scope = Hmo1002::new(session).unwrap();
        assert_eq!(
            scope.passfail_counts().await.unwrap(),
            PassFailCounts {
                total: 120,
                failed: 7,
                passed: 113
            }
        );
        // Counters are re-read every time
        assert_eq!(scope.passfail_passed().await.unwrap(), 113);
    }

    #[tokio::test]
    async fn test_passfail_bad_reply() {
        let session = MockSession::new().with_reply(":mask:coun?", "n/a");
        let mut scope = Hmo1002::new(session).unwrap();
        assert!(matches!(
            scope.passfail_total().await,
            Err(DriverError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_passfail_counts_out_of_range() {
        let session = MockSession::new()
            .with_reply(":mask:coun?", "-9223372036854775808")
            .with_reply(":mask:vco?", "1");
        let mut scope = Hmo1002::new(session).unwrap();
        match scope.passfail_counts().await {
            Err(DriverError::Parse { attribute, .. }) => assert_eq!(attribute, "passfail_passed"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_passfail_commands() {
        let session = MockSession::new();
        let mut scope = Hmo1002::new(session.clone()).unwrap();
        scope.passfail_clear().await.unwrap();
        scope.passfail_start().await.unwrap();
        scope.passfail_stop().await.unwrap();
        assert_eq!(
            session.writes(),
            vec!["mask:res:coun", "mask:test run", "mask:test stop"]
        );
    }

    #[tokio::test]
    async fn test_auto_setup_invalidates_cache() {
        let session = MockSession::new();
        let mut scope = Hmo1002::new(session.clone()).unwrap();
        scope.set_channel_offset(0, 0.5).await.unwrap();

        scope.auto_setup().await.unwrap();

        assert!(!scope.core.cache.is_valid(ScopeAttribute::ChannelOffset, Some(0)));
        assert_eq!(session.writes().last().map(String::as_str), Some(":autoscale"));
    }

    #[tokio::test]
    async fn test_channel_index_beyond_analog_is_out_of_range() {
        let mut scope = Hmo1002::new(MockSession::new()).unwrap();
        assert!(matches!(
            scope.set_channel_scale(2, 1.0).await,
            Err(DriverError::OutOfRange { max: 1, .. })
        ));
    }
}
