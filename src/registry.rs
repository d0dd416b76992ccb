//! Fixed table of protocol channels addressed by id.
//!
//! Boards usually name their channels with a small enum and register them
//! in that order at start-up:
//!
//! ```text
//! #[repr(u8)]
//! enum Link { Host = 0, Bus = 1 }
//!
//! let host = registry.add(host_cfg, uart0)?;   // == Link::Host as u8
//! let bus  = registry.add(bus_cfg, rs485)?;    // == Link::Bus as u8
//! ```
//!
//! Every call names its channel explicitly; there is no "current channel".

use heapless::Vec;

use crate::channel::{Channel, RxStatus};
use crate::config::ChannelConfig;
use crate::error::{Error, Result, UsageError};
use crate::master::TickAction;
use crate::protocol::sink::ByteSink;

/// Up to `N` channels sharing a sink type `S` and application context `C`.
pub struct Registry<S: ByteSink, C: 'static, const N: usize> {
    channels: Vec<Channel<S, C>, N>,
}

impl<S: ByteSink, C: 'static, const N: usize> Registry<S, C, N> {
    pub fn new() -> Self {
        Self { channels: Vec::new() }
    }

    /// Register a channel; returns its id.
    pub fn add(&mut self, config: ChannelConfig, sink: S) -> Result<u8> {
        if self.channels.is_full() {
            return Err(Error::Config("channel registry full"));
        }
        let id = self.channels.len() as u8;
        let channel = Channel::new(id, config, sink)?;
        // Capacity checked above.
        let _ = self.channels.push(channel);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel(&self, id: u8) -> Result<&Channel<S, C>> {
        self.channels
            .get(id as usize)
            .ok_or(UsageError::IllegalChannel(id).into())
    }

    pub fn channel_mut(&mut self, id: u8) -> Result<&mut Channel<S, C>> {
        self.channels
            .get_mut(id as usize)
            .ok_or(UsageError::IllegalChannel(id).into())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel<S, C>> {
        self.channels.iter()
    }

    // ── Transmit side ─────────────────────────────────────────

    pub fn begin_frame(&mut self, id: u8, command: u8, option: u8) -> Result<()> {
        self.channel_mut(id)?.begin_frame(command, option)
    }

    pub fn set_option(&mut self, id: u8, option: u8) -> Result<()> {
        self.channel_mut(id)?.set_option(option);
        Ok(())
    }

    pub fn set_sequence(&mut self, id: u8, sequence: u8) -> Result<()> {
        self.channel_mut(id)?.set_sequence(sequence);
        Ok(())
    }

    pub fn set_destination_address(&mut self, id: u8, address: u8) -> Result<()> {
        self.channel_mut(id)?.set_destination_address(address);
        Ok(())
    }

    pub fn set_local_address(&mut self, id: u8, address: u8) -> Result<()> {
        self.channel_mut(id)?.set_local_address(address)
    }

    pub fn append_byte(&mut self, id: u8, byte: u8) -> Result<()> {
        self.channel_mut(id)?.append_byte(byte)
    }

    pub fn append_block(&mut self, id: u8, bytes: &[u8]) -> Result<()> {
        self.channel_mut(id)?.append_block(bytes)
    }

    pub fn transmit(&mut self, id: u8) -> Result<usize> {
        self.channel_mut(id)?.transmit()
    }

    // ── Receive side ──────────────────────────────────────────

    pub fn process_byte(&mut self, id: u8, byte: u8, flag: u8, app: &mut C) -> Result<RxStatus> {
        self.channel_mut(id)?.process_byte(byte, flag, app)
    }

    pub fn command(&self, id: u8) -> Result<u8> {
        Ok(self.channel(id)?.command())
    }

    pub fn option(&self, id: u8) -> Result<u8> {
        Ok(self.channel(id)?.option())
    }

    pub fn sequence(&self, id: u8) -> Result<u8> {
        Ok(self.channel(id)?.sequence())
    }

    pub fn source_address(&self, id: u8) -> Result<u8> {
        Ok(self.channel(id)?.source_address())
    }

    pub fn payload_len(&self, id: u8) -> Result<usize> {
        Ok(self.channel(id)?.payload_len())
    }

    pub fn payload_byte(&self, id: u8, index: usize) -> Result<u8> {
        self.channel(id)?.payload_byte(index)
    }

    pub fn is_busy(&self, id: u8) -> Result<bool> {
        Ok(self.channel(id)?.is_busy())
    }

    // ── Master role / housekeeping ────────────────────────────

    pub fn master_send(&mut self, id: u8, index: usize, app: &mut C) -> Result<()> {
        self.channel_mut(id)?.master_send(index, app)
    }

    /// Advance every channel's master timer. Stops at the first sink error.
    pub fn tick_all(&mut self, elapsed_ms: u32, app: &mut C) -> Result<()> {
        for channel in &mut self.channels {
            if channel.tick(elapsed_ms, app)? == TickAction::TimedOut {
                log::debug!("registry: channel {} master timed out", channel.id());
            }
        }
        Ok(())
    }

    pub fn reset(&mut self, id: u8) -> Result<()> {
        self.channel_mut(id)?.reset();
        Ok(())
    }
}

impl<S: ByteSink, C: 'static, const N: usize> Default for Registry<S, C, N> {
    fn default() -> Self {
        Self::new()
    }
}
