//! Cached-attribute drivers for Rohde & Schwarz bench instruments.
//!
//! This library contains drivers for the HMC8012 digital multimeter and the
//! HMO1002 oscilloscope. Every instrument setting is held in a per-driver
//! cache so repeated reads cost no I/O, and writes invalidate exactly the
//! settings they affect.
//!
//! - [`attribute`]: declarative attribute tables and the cache itself
//! - [`session`]: the I/O seam (VISA, mock/simulated)
//! - [`instruments`]: the drivers
//! - [`capabilities`]: small traits the drivers are composed from
//! - [`config`] and [`logging`]: application setup

pub mod attribute;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod instruments;
pub mod logging;
pub mod session;
