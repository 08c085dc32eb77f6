//! Instrument sessions
//!
//! A session is the connection the drivers talk through. Drivers never open
//! or manage connections themselves; they are handed something implementing
//! [`Session`] and only ever issue text commands, text queries and IEEE 488.2
//! block transfers through it.
//!
//! ## Simulate mode
//!
//! Every session carries a `simulate` flag. When it is set the drivers skip all
//! I/O and treat their cached values as authoritative, so a driver can be
//! exercised without any hardware attached.

pub mod block;
pub mod mock;
pub mod visa;

pub use mock::{MockSession, SessionCall};
pub use visa::VisaSession;

use anyhow::Result;
use async_trait::async_trait;

/// Text and block I/O with a single instrument.
///
/// Implementations own timeouts and retries; callers see one blocking
/// exchange per method call.
#[async_trait]
pub trait Session: Send + Sync {
    /// Send a command without reading a reply (e.g. `"*RST"`).
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a query and return its reply, trimmed of line terminators.
    async fn ask(&self, query: &str) -> Result<String>;

    /// Send `prefix` followed by `data` framed as an IEEE 488.2 definite-length block.
    async fn write_block(&self, data: &[u8], prefix: &str) -> Result<()>;

    /// Read one IEEE 488.2 block and return its payload.
    async fn read_block(&self) -> Result<Vec<u8>>;

    /// Device clear (interface-level reset of the I/O buffers).
    async fn clear(&self) -> Result<()>;

    /// True when no I/O should be performed.
    fn simulate(&self) -> bool;
}
