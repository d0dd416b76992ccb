//! bincmd: byte-stuffed binary command protocol engine.
//!
//! Frames are delimited with DLE control pairs, carry a command and option
//! byte (and optionally addresses and a sequence number), a payload and a
//! checksum trailer. A [`Channel`] couples one receiver, one frame builder,
//! a slave command dispatcher and an optional master transaction manager to
//! a [`ByteSink`]. A [`Registry`] holds several independent channels.
//!
//! Pure logic with no platform dependencies; bytes in, bytes out.

#![deny(unused_must_use)]

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod master;
pub mod protocol;
pub mod registry;

pub use channel::{Channel, ChannelStats, RxStatus};
pub use config::{BufferMode, ChannelConfig};
pub use dispatch::{
    CommandContext, CommandEntry, CommandHandler, CommandTable, Compare, CompareOp, Disposition,
    ExpectedLen, TableEntry,
};
pub use error::{Error, NakCode, Result};
pub use master::{MasterCommand, MasterError, MasterState, TickAction};
pub use protocol::builder::FrameBuilder;
pub use protocol::checksum::ChecksumMode;
pub use protocol::receiver::{Frame, FrameReceiver, RxEvent};
pub use protocol::sink::ByteSink;
pub use protocol::{Addressing, FrameLayout};
pub use registry::Registry;
