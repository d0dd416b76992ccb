//! Outgoing frame construction.
//!
//! Header fields and payload are staged first, so option, sequence and
//! destination can still be changed up to [`FrameBuilder::finalize`]. The
//! encoder then walks the frame in wire order, escaping each field byte and
//! folding every byte it writes (escape pairs and trailer included) into the
//! checksum, exactly as the receiver folds what it reads.

use heapless::Vec;
use log::warn;

use super::checksum::Checksum;
use super::sink::ByteSink;
use super::{DLE, EOT, ESC, FrameLayout, MAX_ENCODED_FRAME, MAX_PAYLOAD, SOH, STX};
use crate::error::{Result, TransmitError};

/// Transmit-side buffer control for one channel.
pub struct FrameBuilder {
    layout: FrameLayout,
    capacity: usize,
    local_address: u8,
    destination: u8,
    command: u8,
    option: u8,
    sequence: u8,
    payload: Vec<u8, MAX_PAYLOAD>,
    /// Set once the first payload byte is appended; emits `DLE STX`.
    data_open: bool,
    open: bool,
    checksum: Checksum,
    encoded: Vec<u8, MAX_ENCODED_FRAME>,
}

impl FrameBuilder {
    pub fn new(layout: FrameLayout, local_address: u8, capacity: usize) -> Self {
        Self {
            layout,
            capacity: capacity.min(MAX_PAYLOAD),
            local_address,
            destination: 0,
            command: 0,
            option: 0,
            sequence: 0,
            payload: Vec::new(),
            data_open: false,
            open: false,
            checksum: Checksum::new(layout.checksum),
            encoded: Vec::new(),
        }
    }

    /// Start a new frame. Any previously staged frame is discarded;
    /// destination and sequence carry over until changed.
    pub fn begin_frame(&mut self, command: u8, option: u8) {
        self.command = command;
        self.option = option;
        self.payload.clear();
        self.data_open = false;
        self.open = true;
    }

    pub fn set_option(&mut self, option: u8) {
        self.option = option;
    }

    pub fn set_sequence(&mut self, sequence: u8) {
        self.sequence = sequence;
    }

    pub fn set_destination_address(&mut self, address: u8) {
        self.destination = address;
    }

    pub fn set_local_address(&mut self, address: u8) {
        self.local_address = address;
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn option(&self) -> u8 {
        self.option
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn destination_address(&self) -> u8 {
        self.destination
    }

    /// Staged (unescaped) payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Drop the staged frame without sending it.
    pub fn discard(&mut self) {
        self.open = false;
        self.payload.clear();
        self.data_open = false;
    }

    pub fn append_byte(&mut self, byte: u8) -> Result<()> {
        self.append_block(&[byte])
    }

    /// Append `bytes` to the payload. Either all bytes fit or none are taken.
    pub fn append_block(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.open {
            return Err(TransmitError::NoFrameOpen.into());
        }
        if self.payload.len() + bytes.len() > self.capacity {
            return Err(TransmitError::PayloadFull.into());
        }
        self.data_open = true;
        // Length checked against capacity <= MAX_PAYLOAD above.
        let _ = self.payload.extend_from_slice(bytes);
        Ok(())
    }

    /// Append a big-endian `u16`.
    pub fn append_u16_be(&mut self, value: u16) -> Result<()> {
        self.append_block(&value.to_be_bytes())
    }

    /// Append a little-endian `u16`.
    pub fn append_u16_le(&mut self, value: u16) -> Result<()> {
        self.append_block(&value.to_le_bytes())
    }

    /// Append a big-endian `u32`.
    pub fn append_u32_be(&mut self, value: u32) -> Result<()> {
        self.append_block(&value.to_be_bytes())
    }

    /// Append a little-endian `u32`.
    pub fn append_u32_le(&mut self, value: u32) -> Result<()> {
        self.append_block(&value.to_le_bytes())
    }

    /// Encode the staged frame and hand it to `sink`.
    /// Returns the number of bytes on the wire.
    pub fn finalize<S: ByteSink>(&mut self, sink: &mut S) -> Result<usize> {
        if !self.open {
            return Err(TransmitError::NoFrameOpen.into());
        }
        self.encode();
        self.open = false;
        self.send(sink)
    }

    /// Send the last encoded frame again.
    pub fn retransmit<S: ByteSink>(&mut self, sink: &mut S) -> Result<usize> {
        if self.encoded.is_empty() {
            return Err(TransmitError::NothingToResend.into());
        }
        self.send(sink)
    }

    /// Wire bytes of the last finalized frame.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn send<S: ByteSink>(&mut self, sink: &mut S) -> Result<usize> {
        match sink.transmit(&self.encoded) {
            Ok(()) => Ok(self.encoded.len()),
            Err(e) => {
                warn!("tx: byte sink rejected {}-byte frame: {:?}", self.encoded.len(), e);
                Err(TransmitError::SinkFailed.into())
            }
        }
    }

    fn encode(&mut self) {
        self.encoded.clear();
        self.checksum.reset();

        self.put_control(SOH);
        if self.layout.is_multidrop() {
            self.put_escaped(self.destination);
            self.put_escaped(self.local_address);
        }
        self.put_escaped(self.command);
        self.put_escaped(self.option);
        if self.layout.sequence_numbers {
            self.put_escaped(self.sequence);
        }

        if self.data_open {
            self.put_control(STX);
            for i in 0..self.payload.len() {
                self.put_escaped(self.payload[i]);
            }
        }

        self.put_control(EOT);
        let (trailer, len) = self.checksum.trailer();
        for &b in &trailer[..len] {
            self.put_raw(b);
        }
    }

    fn put_raw(&mut self, byte: u8) {
        self.checksum.fold(byte);
        // MAX_ENCODED_FRAME covers a fully escaped MAX_PAYLOAD frame.
        let _ = self.encoded.push(byte);
    }

    fn put_control(&mut self, code: u8) {
        self.put_raw(DLE);
        self.put_raw(code);
    }

    fn put_escaped(&mut self, byte: u8) {
        self.put_raw(byte);
        if byte == DLE {
            self.put_raw(ESC);
        }
    }
}
