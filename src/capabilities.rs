//! Capability traits
//!
//! Drivers are composed from small capabilities instead of one wide trait.
//! Code that only needs memory slots or per-channel vertical settings can be
//! written against that capability and work with any driver providing it.

use crate::error::DriverResult;
use crate::instruments::{DeviceError, Identity, InitOptions};
use async_trait::async_trait;

/// Lifecycle and IEEE 488.2 common commands every driver supports.
#[async_trait]
pub trait Instrument: Send {
    /// Clear the interface, optionally verify the model and reset.
    ///
    /// Fails with `DeviceIdentityMismatch` when `id_query` is set and the
    /// instrument reports an unexpected model.
    async fn initialize(&mut self, options: InitOptions) -> DriverResult<()>;

    /// Parsed `*IDN?` reply.
    async fn identity(&mut self) -> DriverResult<Identity>;

    /// Reset the instrument to its defaults and drop every cached value.
    async fn reset(&mut self) -> DriverResult<()>;

    /// Pop one entry from the instrument error queue.
    async fn error_query(&mut self) -> DriverResult<DeviceError>;

    /// Run the built-in self test and return its result code (0 = pass).
    async fn self_test(&mut self) -> DriverResult<i32>;

    /// Mark every cached attribute stale.
    fn invalidate_all(&mut self);
}

/// Numbered setup memories (`*SAV` / `*RCL`).
#[async_trait]
pub trait MemorySlots: Send {
    /// Number of slots; valid slots are `1..=memory_size()`.
    fn memory_size(&self) -> usize;

    /// Store the current setup in `slot`.
    async fn save(&mut self, slot: usize) -> DriverResult<()>;

    /// Restore the setup stored in `slot`. Every cached value becomes stale.
    async fn recall(&mut self, slot: usize) -> DriverResult<()>;
}

/// A measurement whose input range snaps onto a ladder.
#[async_trait]
pub trait RangedMeasurement: Send {
    /// Current input range.
    async fn range(&mut self) -> DriverResult<f64>;

    /// Select the smallest admitted range covering `range`; returns the range used.
    async fn set_range(&mut self, range: f64) -> DriverResult<f64>;

    /// Whether the instrument picks the range itself.
    async fn auto_range(&mut self) -> DriverResult<bool>;

    /// Enable or disable automatic ranging.
    async fn set_auto_range(&mut self, enabled: bool) -> DriverResult<()>;
}

/// Vertical settings of indexed input channels.
#[async_trait]
pub trait ChannelVertical: Send {
    /// Number of channels addressable by index.
    fn channel_count(&self) -> usize;

    /// Full-scale vertical range in volts.
    async fn channel_range(&mut self, index: usize) -> DriverResult<f64>;

    /// Set the full-scale vertical range in volts.
    async fn set_channel_range(&mut self, index: usize, range: f64) -> DriverResult<()>;

    /// Volts per division.
    async fn channel_scale(&mut self, index: usize) -> DriverResult<f64>;

    /// Set volts per division.
    async fn set_channel_scale(&mut self, index: usize, scale: f64) -> DriverResult<()>;

    /// Vertical offset in volts.
    async fn channel_offset(&mut self, index: usize) -> DriverResult<f64>;

    /// Set the vertical offset in volts.
    async fn set_channel_offset(&mut self, index: usize, offset: f64) -> DriverResult<()>;
}
