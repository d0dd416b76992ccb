//! Link-layer framing over an arbitrary byte stream.
//!
//! Wire format (fields in brackets depend on the channel configuration):
//! ```text
//! ┌─────┬─────┬───────┬───────┬─────┬─────┬───────┬─────┬─────┬────────┬─────┬─────┬──────────┐
//! │ DLE │ SOH │ [Dst] │ [Src] │ Cmd │ Opt │ [Seq] │ DLE │ STX │ data…  │ DLE │ EOT │ chk (1|2)│
//! └─────┴─────┴───────┴───────┴─────┴─────┴───────┴─────┴─────┴────────┴─────┴─────┴──────────┘
//!                                                  └─ data block only when a payload is staged ─┘
//! ```
//!
//! Any literal field or payload byte equal to `DLE` is sent as `DLE ESC`.
//! The checksum covers every byte on the wire from the first `DLE` up to
//! the trailer, escape pairs included.
//!
//! ```text
//!  raw bytes ─▶ FrameReceiver ─▶ Frame ─▶ Dispatcher / Master ─▶ FrameBuilder ─▶ ByteSink
//!                    │                                                 │
//!                    └──────────────── Checksum ───────────────────────┘
//! ```

pub mod builder;
pub mod checksum;
pub mod receiver;
pub mod sink;

/// Control marker; introduces every control pair and escapes itself.
pub const DLE: u8 = 0x10;
/// Start-of-header, follows `DLE` at the start of a frame.
pub const SOH: u8 = 0x01;
/// Start-of-data, opens the payload block.
pub const STX: u8 = 0x02;
/// End-of-frame, precedes the checksum trailer.
pub const EOT: u8 = 0x04;
/// Literal escape: `DLE ESC` stands for one literal `DLE`.
pub const ESC: u8 = 0xEF;

/// Reply command for a positive acknowledgement.
pub const ACK: u8 = 0x06;
/// Reply command for a negative acknowledgement; `Opt` carries the code.
pub const NAK: u8 = 0x15;

/// Destination address every multidrop node accepts.
pub const BROADCAST: u8 = 0x00;

/// Upper bound on any channel's payload capacity.
pub const MAX_PAYLOAD: usize = 256;

/// Worst-case encoded frame: every header/payload byte escaped, plus
/// the three control pairs and a two-byte trailer (itself unescaped).
pub const MAX_ENCODED_FRAME: usize = 2 + 2 * (5 + MAX_PAYLOAD) + 4 + 2;

/// Addressing mode of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Addressing {
    /// Two devices on a dedicated link; no address bytes on the wire.
    PointToPoint,
    /// Shared bus; every frame carries destination and source addresses.
    Multidrop,
}

/// Options that change the frame layout. Both ends of a link must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub addressing: Addressing,
    pub sequence_numbers: bool,
    pub checksum: checksum::ChecksumMode,
}

impl FrameLayout {
    pub fn is_multidrop(&self) -> bool {
        self.addressing == Addressing::Multidrop
    }
}
