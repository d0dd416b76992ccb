//! Frame checksum algorithms.
//!
//! All three modes are folded one byte at a time so the receiver and the
//! builder can run them alongside escaping, in wire order.

use serde::{Deserialize, Serialize};

/// Checksum algorithm selected per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumMode {
    /// XOR of every byte; 1-byte trailer.
    RunningXor,
    /// Sum of every byte modulo 256, sent negated; 1-byte trailer.
    TwosComplementSum,
    /// CRC-16, polynomial 0x1021, initial 0xFFFF, MSB first; 2-byte trailer.
    Crc16,
}

impl ChecksumMode {
    /// Trailer length in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::RunningXor | Self::TwosComplementSum => 1,
            Self::Crc16 => 2,
        }
    }
}

const CRC16_INIT: u16 = 0xFFFF;

/// Nibble table for polynomial 0x1021: `TABLE[n] = n * 0x1021` in GF(2).
const CRC16_NIBBLE_TABLE: [u16; 16] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50A5, 0x60C6, 0x70E7, //
    0x8108, 0x9129, 0xA14A, 0xB16B, 0xC18C, 0xD1AD, 0xE1CE, 0xF1EF,
];

#[inline]
fn crc16_nibble(crc: u16, nibble: u8) -> u16 {
    let idx = ((crc >> 12) as u8 ^ (nibble & 0x0F)) as usize;
    (crc << 4) ^ CRC16_NIBBLE_TABLE[idx]
}

/// Running checksum accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum {
    mode: ChecksumMode,
    acc: u16,
}

impl Checksum {
    /// Fresh accumulator for `mode`.
    pub const fn new(mode: ChecksumMode) -> Self {
        let acc = match mode {
            ChecksumMode::Crc16 => CRC16_INIT,
            ChecksumMode::RunningXor | ChecksumMode::TwosComplementSum => 0,
        };
        Self { mode, acc }
    }

    pub const fn mode(&self) -> ChecksumMode {
        self.mode
    }

    /// Restart at the mode's initial value (frame start).
    pub fn reset(&mut self) {
        *self = Self::new(self.mode);
    }

    /// Fold one wire byte into the accumulator.
    pub fn fold(&mut self, byte: u8) {
        self.acc = match self.mode {
            ChecksumMode::RunningXor => self.acc ^ byte as u16,
            ChecksumMode::TwosComplementSum => (self.acc as u8).wrapping_add(byte) as u16,
            ChecksumMode::Crc16 => {
                let crc = crc16_nibble(self.acc, byte >> 4);
                crc16_nibble(crc, byte)
            }
        };
    }

    /// Fold every byte of `bytes` in order.
    pub fn fold_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.fold(b);
        }
    }

    /// Value the trailer must carry, as a 16-bit quantity.
    /// One-byte modes return it in the low byte.
    pub fn value(&self) -> u16 {
        match self.mode {
            ChecksumMode::RunningXor => self.acc & 0x00FF,
            ChecksumMode::TwosComplementSum => (self.acc as u8).wrapping_neg() as u16,
            ChecksumMode::Crc16 => self.acc,
        }
    }

    /// Trailer bytes, MSB first for CRC-16. Only the first
    /// [`ChecksumMode::width`] bytes are meaningful.
    pub fn trailer(&self) -> ([u8; 2], usize) {
        let value = self.value();
        match self.mode {
            ChecksumMode::Crc16 => (value.to_be_bytes(), 2),
            ChecksumMode::RunningXor | ChecksumMode::TwosComplementSum => ([value as u8, 0], 1),
        }
    }
}

/// One-shot checksum over `bytes`.
pub fn compute(mode: ChecksumMode, bytes: &[u8]) -> u16 {
    let mut c = Checksum::new(mode);
    c.fold_all(bytes);
    c.value()
}
