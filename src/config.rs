//! Channel configuration parameters
//!
//! One [`ChannelConfig`] per protocol channel, fixed at start-up.
//! Values can be loaded from a persisted parameter block (postcard bytes).

use serde::{Deserialize, Serialize};

use crate::dispatch::MAX_TABLE_DEPTH;
use crate::error::{Error, Result};
use crate::protocol::checksum::ChecksumMode;
use crate::protocol::{Addressing, BROADCAST, FrameLayout, MAX_PAYLOAD};

/// Whether reply staging shares space with the received payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferMode {
    /// One buffer: staging a reply invalidates the received payload.
    Single,
    /// Separate receive and transmit buffers.
    Dual,
}

/// Per-channel protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    // --- Framing ---
    pub addressing: Addressing,
    pub buffers: BufferMode,
    /// Carry a sequence byte after the option byte
    pub sequence_numbers: bool,
    pub checksum: ChecksumMode,
    /// Own address on a multidrop bus (0 is the broadcast address)
    pub local_address: u8,

    // --- Roles ---
    /// Enable the master transaction manager
    pub master: bool,
    /// Resends after a response timeout before giving up
    pub retries: u8,
    /// Master response timeout in milliseconds (0 = wait forever)
    pub response_timeout_ms: u32,

    // --- Dispatch ---
    /// Nesting limit for linked command tables
    pub table_depth: u8,

    // --- Buffers ---
    /// Receive payload capacity in bytes
    pub rx_capacity: u16,
    /// Transmit payload capacity in bytes
    pub tx_capacity: u16,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            // Framing
            addressing: Addressing::PointToPoint,
            buffers: BufferMode::Dual,
            sequence_numbers: false,
            checksum: ChecksumMode::RunningXor,
            local_address: 1,

            // Roles
            master: false,
            retries: 0,
            response_timeout_ms: 0,

            // Dispatch
            table_depth: MAX_TABLE_DEPTH as u8,

            // Buffers
            rx_capacity: 64,
            tx_capacity: 64,
        }
    }
}

impl ChannelConfig {
    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.addressing == Addressing::Multidrop && self.local_address == BROADCAST {
            return Err(Error::Config("multidrop local address must not be the broadcast address"));
        }
        if self.table_depth == 0 || self.table_depth as usize > MAX_TABLE_DEPTH {
            return Err(Error::Config("table depth out of range"));
        }
        if self.rx_capacity == 0 || self.rx_capacity as usize > MAX_PAYLOAD {
            return Err(Error::Config("rx capacity out of range"));
        }
        if self.tx_capacity == 0 || self.tx_capacity as usize > MAX_PAYLOAD {
            return Err(Error::Config("tx capacity out of range"));
        }
        if self.retries > 0 && self.response_timeout_ms == 0 {
            return Err(Error::Config("retries need a response timeout"));
        }
        Ok(())
    }

    /// Frame layout shared by this channel's receiver and builder.
    pub fn layout(&self) -> FrameLayout {
        FrameLayout {
            addressing: self.addressing,
            sequence_numbers: self.sequence_numbers,
            checksum: self.checksum,
        }
    }

    /// Decode a persisted parameter block and validate it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let config: Self =
            postcard::from_bytes(bytes).map_err(|_| Error::Config("undecodable parameter block"))?;
        config.validate()?;
        Ok(config)
    }

    /// Encode for persistence.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|_| Error::Config("unencodable parameter block"))
    }
}
