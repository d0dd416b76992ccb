//! Byte-at-a-time frame receiver.
//!
//! ```text
//!  Idle ─DLE─▶ Header ─SOH─▶ [DstAddr] ─▶ [SrcAddr] ─▶ Cmd ─▶ Opt ─▶ [Seq] ─▶ AwaitBlock
//!                                                                                │
//!                             ┌───────────── DLE STX ────────────────────────────┤
//!                             ▼                                                  │
//!                           Data* ──────────── DLE EOT ──▶ ChecksumHi ◀─ DLE EOT ┘
//!                                                             │
//!                                                    [ChecksumLo] ──▶ Idle
//! ```
//!
//! A `DLE` seen in any field state parks the machine in `Control`, which
//! reads the next byte: `ESC` hands a literal `DLE` back to the parked field,
//! `STX` opens the data block, `EOT` moves to the trailer. Anything else is a
//! framing error and the receiver drops back to `Idle` to wait for the next
//! frame start. The receiver never stops on a bad byte.

use heapless::Vec;
use log::{debug, trace};

use super::checksum::Checksum;
use super::{BROADCAST, DLE, EOT, ESC, FrameLayout, MAX_PAYLOAD, SOH, STX};

/// Field currently being filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    DstAddr,
    SrcAddr,
    Command,
    Option,
    Sequence,
    /// Header complete; expecting `DLE STX` or `DLE EOT`.
    AwaitBlock,
    Data,
}

/// Receiver run-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Idle,
    /// Saw the opening `DLE`; expecting `SOH`.
    Header,
    Field(Field),
    /// Saw a `DLE` while in the given field.
    Control(Field),
    ChecksumHi,
    ChecksumLo { hi: u8 },
}

/// Outcome of feeding one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxEvent {
    /// Not inside a frame.
    Idle,
    /// Inside a frame; more bytes needed.
    Receiving,
    /// A complete frame with a valid checksum is ready.
    Frame,
    /// A complete frame arrived but its trailer did not match.
    ChecksumError,
    /// A complete, valid frame whose payload exceeded the receive capacity.
    Overflow,
    /// Frame addressed to another node; skipped.
    Ignored,
    /// Unexpected control sequence; resynchronising.
    FramingError,
}

/// Read-only view of the last decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub destination: u8,
    pub source: u8,
    pub command: u8,
    pub option: u8,
    pub sequence: u8,
    pub payload: &'a [u8],
}

impl Frame<'_> {
    /// True when the frame was sent to the multidrop broadcast address.
    pub fn is_broadcast(&self, layout: &FrameLayout) -> bool {
        layout.is_multidrop() && self.destination == BROADCAST
    }
}

/// Receive-side buffer control for one channel.
pub struct FrameReceiver {
    layout: FrameLayout,
    local_address: u8,
    capacity: usize,
    state: RxState,
    checksum: Checksum,
    destination: u8,
    source: u8,
    command: u8,
    option: u8,
    sequence: u8,
    payload: Vec<u8, MAX_PAYLOAD>,
    overflowed: bool,
}

impl FrameReceiver {
    pub fn new(layout: FrameLayout, local_address: u8, capacity: usize) -> Self {
        Self {
            layout,
            local_address,
            capacity: capacity.min(MAX_PAYLOAD),
            state: RxState::Idle,
            checksum: Checksum::new(layout.checksum),
            destination: 0,
            source: 0,
            command: 0,
            option: 0,
            sequence: 0,
            payload: Vec::new(),
            overflowed: false,
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// True from the opening `DLE` until the frame completes or is dropped.
    pub fn is_busy(&self) -> bool {
        self.state != RxState::Idle
    }

    pub fn local_address(&self) -> u8 {
        self.local_address
    }

    pub fn set_local_address(&mut self, address: u8) {
        self.local_address = address;
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// The most recently decoded fields. Valid after [`RxEvent::Frame`]
    /// until the next frame starts.
    pub fn frame(&self) -> Frame<'_> {
        Frame {
            destination: self.destination,
            source: self.source,
            command: self.command,
            option: self.option,
            sequence: self.sequence,
            payload: &self.payload,
        }
    }

    /// Drop the decoded payload (the space is being reused for a reply).
    pub fn invalidate_payload(&mut self) {
        self.payload.clear();
    }

    /// Abort any frame in progress.
    pub fn reset(&mut self) {
        self.state = RxState::Idle;
    }

    /// Feed one raw byte from the transport.
    pub fn push(&mut self, byte: u8) -> RxEvent {
        trace!("rx {:02x} in {:?}", byte, self.state);
        match self.state {
            RxState::Idle => {
                if byte == DLE {
                    self.start_frame();
                    self.checksum.fold(byte);
                    self.state = RxState::Header;
                    RxEvent::Receiving
                } else {
                    RxEvent::Idle
                }
            }
            RxState::Header => {
                self.checksum.fold(byte);
                if byte == SOH {
                    self.state = RxState::Field(self.first_field());
                    RxEvent::Receiving
                } else {
                    self.framing_error("missing start-of-header")
                }
            }
            RxState::Field(field) => {
                self.checksum.fold(byte);
                if byte == DLE {
                    self.state = RxState::Control(field);
                    RxEvent::Receiving
                } else {
                    self.accept(field, byte)
                }
            }
            RxState::Control(field) => {
                self.checksum.fold(byte);
                match byte {
                    ESC => self.accept(field, DLE),
                    STX => {
                        self.state = RxState::Field(Field::Data);
                        RxEvent::Receiving
                    }
                    EOT => {
                        self.state = RxState::ChecksumHi;
                        RxEvent::Receiving
                    }
                    _ => self.framing_error("unknown control byte"),
                }
            }
            RxState::ChecksumHi => {
                if self.layout.checksum.width() == 2 {
                    self.state = RxState::ChecksumLo { hi: byte };
                    RxEvent::Receiving
                } else {
                    self.complete(byte as u16)
                }
            }
            RxState::ChecksumLo { hi } => self.complete(u16::from_be_bytes([hi, byte])),
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn first_field(&self) -> Field {
        if self.layout.is_multidrop() {
            Field::DstAddr
        } else {
            Field::Command
        }
    }

    fn start_frame(&mut self) {
        self.checksum.reset();
        self.destination = 0;
        self.source = 0;
        self.command = 0;
        self.option = 0;
        self.sequence = 0;
        self.payload.clear();
        self.overflowed = false;
    }

    fn accept(&mut self, field: Field, byte: u8) -> RxEvent {
        let next = match field {
            Field::DstAddr => {
                if byte != self.local_address && byte != BROADCAST {
                    debug!("rx: frame for {:#04x}, not us ({:#04x})", byte, self.local_address);
                    self.state = RxState::Idle;
                    return RxEvent::Ignored;
                }
                self.destination = byte;
                Field::SrcAddr
            }
            Field::SrcAddr => {
                self.source = byte;
                Field::Command
            }
            Field::Command => {
                self.command = byte;
                Field::Option
            }
            Field::Option => {
                self.option = byte;
                if self.layout.sequence_numbers {
                    Field::Sequence
                } else {
                    Field::AwaitBlock
                }
            }
            Field::Sequence => {
                self.sequence = byte;
                Field::AwaitBlock
            }
            Field::AwaitBlock => return self.framing_error("data before start-of-data"),
            Field::Data => {
                if self.payload.len() < self.capacity {
                    // Capacity is clamped to MAX_PAYLOAD, so this cannot fail.
                    let _ = self.payload.push(byte);
                } else {
                    self.overflowed = true;
                }
                Field::Data
            }
        };
        self.state = RxState::Field(next);
        RxEvent::Receiving
    }

    fn complete(&mut self, received: u16) -> RxEvent {
        self.state = RxState::Idle;
        let expected = self.checksum.value();
        if received != expected {
            debug!(
                "rx: checksum mismatch (got {:#06x}, want {:#06x})",
                received, expected
            );
            RxEvent::ChecksumError
        } else if self.overflowed {
            RxEvent::Overflow
        } else {
            RxEvent::Frame
        }
    }

    fn framing_error(&mut self, why: &'static str) -> RxEvent {
        debug!("rx: resync ({})", why);
        self.state = RxState::Idle;
        RxEvent::FramingError
    }
}
