//! Mock session for testing and simulate mode
//!
//! `MockSession` stands in for a real instrument connection. It provides:
//! - Scripted replies, keyed by query text (case-insensitive)
//! - Echo of written settings, so `timebase:scale 1e-3` makes a later
//!   `timebase:scale?` answer `1e-3` like a real instrument would
//! - A call log and round-trip counter for test verification
//! - Controllable failure injection
//!
//! With the simulate flag set it is also the session used by drivers opened in
//! simulate mode; the drivers then never call into it.

use super::Session;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// One recorded interaction with the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    /// `write(command)`
    Write(String),
    /// `ask(query)`
    Ask(String),
    /// `write_block(data, prefix)`
    WriteBlock {
        /// Command prefix sent before the block
        prefix: String,
        /// Payload length in bytes
        len: usize,
    },
    /// `read_block()`
    ReadBlock,
    /// `clear()`
    Clear,
}

#[derive(Default)]
struct MockState {
    replies: HashMap<String, String>,
    block: Vec<u8>,
    call_log: Vec<SessionCall>,
}

/// Mock instrument session
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// inspection after moving a clone into a driver.
///
/// # Example
///
/// ```
/// use rust_ivi::session::{MockSession, Session};
///
/// # async fn example() -> anyhow::Result<()> {
/// let session = MockSession::new().with_reply("*IDN?", "Rohde&Schwarz,HMC8012,123456,1.0");
/// assert_eq!(session.ask("*idn?").await?, "Rohde&Schwarz,HMC8012,123456,1.0");
/// assert_eq!(session.round_trips(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MockSession {
    simulate: Arc<AtomicBool>,
    should_fail_next: Arc<AtomicBool>,
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    /// Create a mock session that performs (mock) I/O
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock session with the simulate flag set
    pub fn simulated() -> Self {
        let session = Self::new();
        session.set_simulate(true);
        session
    }

    /// Script the reply returned for `query`
    pub fn with_reply(self, query: &str, reply: &str) -> Self {
        self.set_reply(query, reply);
        self
    }

    /// Script the payload returned by `read_block`
    pub fn with_block(self, payload: &[u8]) -> Self {
        self.lock().block = payload.to_vec();
        self
    }

    /// Replace the reply returned for `query`
    pub fn set_reply(&self, query: &str, reply: &str) {
        self.lock()
            .replies
            .insert(normalize(query), reply.to_string());
    }

    /// Set the simulate flag
    pub fn set_simulate(&self, simulate: bool) {
        self.simulate.store(simulate, Ordering::SeqCst);
    }

    /// Inject a failure for the next operation
    pub fn inject_next_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Get the call log
    pub fn call_log(&self) -> Vec<SessionCall> {
        self.lock().call_log.clone()
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        self.lock().call_log.clear();
    }

    /// Number of write-then-read exchanges performed so far
    pub fn round_trips(&self) -> usize {
        self.lock()
            .call_log
            .iter()
            .filter(|call| matches!(call, SessionCall::Ask(_) | SessionCall::ReadBlock))
            .count()
    }

    /// Commands sent with `write`, in order
    pub fn writes(&self) -> Vec<String> {
        self.lock()
            .call_log
            .iter()
            .filter_map(|call| match call {
                SessionCall::Write(command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Payload most recently written with `write_block` (or scripted with `with_block`)
    pub fn block(&self) -> Vec<u8> {
        self.lock().block.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log a call and consume any injected failure
    fn record(&self, call: SessionCall) -> Result<()> {
        trace!(?call, "mock session call");
        self.lock().call_log.push(call);

        if self.should_fail_next.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("Injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for MockSession {
    async fn write(&self, command: &str) -> Result<()> {
        self.record(SessionCall::Write(command.to_string()))?;

        // Echo "HEADER args" as the reply to "HEADER?"
        if let Some((header, args)) = command.trim().split_once(char::is_whitespace) {
            self.set_reply(&format!("{}?", header), args.trim());
        }
        Ok(())
    }

    async fn ask(&self, query: &str) -> Result<String> {
        self.record(SessionCall::Ask(query.to_string()))?;

        self.lock()
            .replies
            .get(&normalize(query))
            .cloned()
            .ok_or_else(|| anyhow!("No scripted reply for query '{}'", query))
    }

    async fn write_block(&self, data: &[u8], prefix: &str) -> Result<()> {
        self.record(SessionCall::WriteBlock {
            prefix: prefix.to_string(),
            len: data.len(),
        })?;
        self.lock().block = data.to_vec();
        Ok(())
    }

    async fn read_block(&self) -> Result<Vec<u8>> {
        self.record(SessionCall::ReadBlock)?;
        Ok(self.lock().block.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.record(SessionCall::Clear)
    }

    fn simulate(&self) -> bool {
        self.simulate.load(Ordering::SeqCst)
    }
}

fn normalize(query: &str) -> String {
    query.trim().to_ascii_lowercase()
}
