//! SPP Link Shared Types
//!
//! This crate provides the peer identity, link state machine, error
//! taxonomy and protocol constants shared by the connection core and the
//! echo peer.

pub mod error;
pub mod state_machine;

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub use error::LinkError;
pub use state_machine::{LinkEvent, LinkState, LinkStateMachine, TransitionResult};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Link parameters
pub mod link {
    /// Serial Port Profile service class UUID (00001101-0000-1000-8000-00805F9B34FB)
    pub const SPP_SERVICE_UUID: u128 = 0x0000_1101_0000_1000_8000_0080_5f9b_34fb;

    /// RFCOMM channel used when the service record lookup fails
    pub const DEFAULT_FALLBACK_CHANNEL: u8 = 1;

    /// Size of the read buffer handed to the stream on each read
    pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

    /// Idle interval between polls when the poll read strategy is used
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

    /// Upper bound on a single connect strategy
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 20_000;
}

/// Opaque, immutable identity of a remote device (usually its address)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(Arc<str>);

impl PeerId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}
