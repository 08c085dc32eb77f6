//! VISA session for GPIB/USB/Ethernet instruments
//!
//! Wraps the visa-rs crate. VISA calls are blocking, so every exchange runs on
//! Tokio's blocking pool while the caller awaits it.
//!
//! Supports resource strings like:
//! - "GPIB0::1::INSTR" (GPIB interface)
//! - "USB0::0x0AAD::0x0118::SERIAL::INSTR" (USB-TMC)
//! - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)
//!
//! Without the `instrument_visa` feature the type still exists, but opening a
//! session fails with [`DriverError::FeatureNotEnabled`].

use super::Session;
use crate::error::{DriverError, DriverResult};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use super::block;
#[cfg(feature = "instrument_visa")]
use anyhow::{anyhow, Context};
#[cfg(feature = "instrument_visa")]
use std::io::{Read, Write};
#[cfg(feature = "instrument_visa")]
use std::sync::{Arc, Mutex, PoisonError};
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// Line terminator appended to every command
#[cfg(feature = "instrument_visa")]
const TERMINATOR: &str = "\n";

/// Session over a VISA resource
pub struct VisaSession {
    #[cfg(feature = "instrument_visa")]
    instrument: Arc<Mutex<Instrument>>,
}

impl VisaSession {
    /// Open `resource` with the given I/O timeout
    #[cfg(feature = "instrument_visa")]
    pub async fn open(resource: &str, timeout: Duration) -> DriverResult<Self> {
        let resource_str = resource.to_string();
        let instrument = tokio::task::spawn_blocking(move || {
            let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
            let name = std::ffi::CString::new(resource_str.clone())
                .context("Resource string contains a NUL byte")?;
            rm.open(&name.into(), AccessMode::NO_LOCK, timeout)
                .with_context(|| format!("Failed to open VISA resource: {}", resource_str))
        })
        .await
        .context("VISA open task panicked")??;

        debug!(resource, timeout_ms = timeout.as_millis() as u64, "VISA resource opened");
        Ok(Self {
            instrument: Arc::new(Mutex::new(instrument)),
        })
    }

    /// Open `resource` with the given I/O timeout
    #[cfg(not(feature = "instrument_visa"))]
    pub async fn open(resource: &str, timeout: Duration) -> DriverResult<Self> {
        let _ = (resource, timeout);
        Err(DriverError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    /// Run a blocking exchange on the instrument
    #[cfg(feature = "instrument_visa")]
    async fn with_instrument<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Instrument) -> Result<T> + Send + 'static,
    {
        let instrument = Arc::clone(&self.instrument);
        tokio::task::spawn_blocking(move || {
            let mut guard = instrument.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut guard)
        })
        .await
        .context("VISA I/O task panicked")?
    }
}

#[cfg(feature = "instrument_visa")]
#[async_trait]
impl Session for VisaSession {
    async fn write(&self, command: &str) -> Result<()> {
        let line = format!("{}{}", command, TERMINATOR);
        let command_for_log = command.to_string();
        self.with_instrument(move |instr| {
            instr
                .write_all(line.as_bytes())
                .with_context(|| format!("VISA write failed for: {}", command_for_log))
        })
        .await?;
        debug!("VISA command sent: {}", command);
        Ok(())
    }

    async fn ask(&self, query: &str) -> Result<String> {
        let line = format!("{}{}", query, TERMINATOR);
        let query_for_log = query.to_string();
        let response = self
            .with_instrument(move |instr| {
                instr
                    .write_all(line.as_bytes())
                    .with_context(|| format!("VISA write failed for: {}", query_for_log))?;
                let mut buf = vec![0u8; 4096];
                let n = instr
                    .read(&mut buf)
                    .with_context(|| format!("VISA read failed for: {}", query_for_log))?;
                Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string())
            })
            .await?;
        debug!("VISA query '{}' -> '{}'", query, response);
        Ok(response)
    }

    async fn write_block(&self, data: &[u8], prefix: &str) -> Result<()> {
        let mut frame = prefix.as_bytes().to_vec();
        frame.extend_from_slice(&block::encode(data));
        frame.extend_from_slice(TERMINATOR.as_bytes());
        self.with_instrument(move |instr| {
            instr
                .write_all(&frame)
                .context("VISA block write failed")
        })
        .await
    }

    async fn read_block(&self) -> Result<Vec<u8>> {
        let raw = self
            .with_instrument(|instr| {
                let mut raw = Vec::new();
                let mut chunk = vec![0u8; 64 * 1024];
                loop {
                    let n = instr.read(&mut chunk).context("VISA block read failed")?;
                    raw.extend_from_slice(&chunk[..n]);
                    match block::decode(&raw) {
                        Ok(_) => return Ok(raw),
                        Err(_) if n == chunk.len() => continue,
                        Err(e) => return Err(anyhow!(e)),
                    }
                }
            })
            .await?;
        Ok(block::decode(&raw)?)
    }

    async fn clear(&self) -> Result<()> {
        self.with_instrument(|instr| instr.clear().context("VISA device clear failed"))
            .await
    }

    fn simulate(&self) -> bool {
        false
    }
}

#[cfg(not(feature = "instrument_visa"))]
#[async_trait]
impl Session for VisaSession {
    async fn write(&self, _command: &str) -> Result<()> {
        Err(DriverError::FeatureNotEnabled("instrument_visa".to_string()).into())
    }

    async fn ask(&self, _query: &str) -> Result<String> {
        Err(DriverError::FeatureNotEnabled("instrument_visa".to_string()).into())
    }

    async fn write_block(&self, _data: &[u8], _prefix: &str) -> Result<()> {
        Err(DriverError::FeatureNotEnabled("instrument_visa".to_string()).into())
    }

    async fn read_block(&self) -> Result<Vec<u8>> {
        Err(DriverError::FeatureNotEnabled("instrument_visa".to_string()).into())
    }

    async fn clear(&self) -> Result<()> {
        Err(DriverError::FeatureNotEnabled("instrument_visa".to_string()).into())
    }

    fn simulate(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "instrument_visa"))]
    #[tokio::test]
    async fn test_open_without_feature_fails() {
        let result = VisaSession::open("TCPIP0::192.168.1.100::INSTR", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(DriverError::FeatureNotEnabled(f)) if f == "instrument_visa"));
    }
}
