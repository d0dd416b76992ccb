//! Unified error types for the binary command engine.
//!
//! A single `Error` enum that every subsystem converts into, so callers
//! driving several channels handle failures uniformly. All variants are
//! `Copy` so they can be returned from byte-level code without allocation.
//!
//! Wire-level diagnostics (the codes a peer sees in a NAK option byte) are
//! a separate type, [`NakCode`]: they describe what went wrong with a
//! *received frame*, not with a local API call.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible public operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The caller misused the API (bad id, bad index, table problems).
    Usage(UsageError),
    /// A master-role operation was attempted on the wrong channel or command.
    Role(RoleError),
    /// A frame could not be staged or handed to the byte sink.
    Transmit(TransmitError),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(e) => write!(f, "usage: {e}"),
            Self::Role(e) => write!(f, "role: {e}"),
            Self::Transmit(e) => write!(f, "transmit: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Caller-misuse errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    /// No channel is registered under this id.
    IllegalChannel(u8),
    /// Payload index past the end of the decoded payload.
    IllegalBufferIndex(usize),
    /// A table link would exceed the configured nesting depth.
    TooManyTables,
    /// A slave frame arrived but no command table is installed.
    NoCommandTable,
    /// A command table is not terminated correctly.
    MalformedTable,
    /// The channel is mid-frame and shares one buffer for both directions.
    ChannelBusy,
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalChannel(id) => write!(f, "illegal channel id {id}"),
            Self::IllegalBufferIndex(i) => write!(f, "illegal buffer index {i}"),
            Self::TooManyTables => write!(f, "too many nested command tables"),
            Self::NoCommandTable => write!(f, "no command table installed"),
            Self::MalformedTable => write!(f, "command table is not terminated"),
            Self::ChannelBusy => write!(f, "channel busy receiving"),
        }
    }
}

impl From<UsageError> for Error {
    fn from(e: UsageError) -> Self {
        Self::Usage(e)
    }
}

// ---------------------------------------------------------------------------
// Role errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleError {
    /// The channel was not configured with the master role.
    NotMaster,
    /// Master command index is outside the installed master table.
    IllegalMasterCommand(usize),
    /// A transaction is already awaiting its response.
    MasterBusy,
}

impl fmt::Display for RoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotMaster => write!(f, "channel is not configured as master"),
            Self::IllegalMasterCommand(i) => write!(f, "illegal master command index {i}"),
            Self::MasterBusy => write!(f, "master transaction already in flight"),
        }
    }
}

impl From<RoleError> for Error {
    fn from(e: RoleError) -> Self {
        Self::Role(e)
    }
}

// ---------------------------------------------------------------------------
// Transmit errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitError {
    /// Payload would exceed the channel's transmit capacity.
    PayloadFull,
    /// `append`/`finalize` called without a preceding `begin_frame`.
    NoFrameOpen,
    /// Nothing has been encoded yet, so there is nothing to resend.
    NothingToResend,
    /// The injected byte sink rejected the frame.
    SinkFailed,
}

impl fmt::Display for TransmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadFull => write!(f, "transmit payload full"),
            Self::NoFrameOpen => write!(f, "no frame open"),
            Self::NothingToResend => write!(f, "no encoded frame to resend"),
            Self::SinkFailed => write!(f, "byte sink failed"),
        }
    }
}

impl From<TransmitError> for Error {
    fn from(e: TransmitError) -> Self {
        Self::Transmit(e)
    }
}

// ---------------------------------------------------------------------------
// Wire diagnostic codes
// ---------------------------------------------------------------------------

/// Diagnostic code carried in the option byte of a NAK frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NakCode {
    /// Trailer did not match the accumulated checksum.
    ChecksumError = 0x01,
    /// No table entry matched the command.
    IllegalCommand = 0x02,
    /// Entry matched but the payload length did not.
    IllegalLength = 0x03,
    /// Entry matched but the runtime flag comparison failed.
    FlagMismatch = 0x04,
    /// The command was understood but the handler could not act on it.
    NotProcessed = 0x05,
    /// Payload exceeded the receive capacity.
    BufferOverflow = 0x06,
    /// Local table configuration prevented dispatch.
    TableFault = 0x07,
}

impl NakCode {
    /// Wire value of this code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire value. Unknown values map to `None`.
    pub fn from_code(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::ChecksumError),
            0x02 => Some(Self::IllegalCommand),
            0x03 => Some(Self::IllegalLength),
            0x04 => Some(Self::FlagMismatch),
            0x05 => Some(Self::NotProcessed),
            0x06 => Some(Self::BufferOverflow),
            0x07 => Some(Self::TableFault),
            _ => None,
        }
    }
}

impl fmt::Display for NakCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChecksumError => write!(f, "checksum error"),
            Self::IllegalCommand => write!(f, "illegal command"),
            Self::IllegalLength => write!(f, "illegal length"),
            Self::FlagMismatch => write!(f, "flag mismatch"),
            Self::NotProcessed => write!(f, "not processed"),
            Self::BufferOverflow => write!(f, "buffer overflow"),
            Self::TableFault => write!(f, "command table fault"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
