//! Slave-role command dispatch.
//!
//! The dispatcher walks the installed [`CommandTable`] from its first entry.
//! Links push the current position onto a bounded nesting stack and continue
//! in the linked table; a terminator pops back out (or, at the root, means
//! the command is unknown). The first entry whose masked command matches
//! decides the outcome: its length and flag gates are checked and, if both
//! pass, its handler runs exactly once.

pub mod table;

use heapless::Vec;
use log::debug;

use crate::error::NakCode;
use crate::protocol::builder::FrameBuilder;
use crate::protocol::receiver::Frame;

pub use table::{CommandEntry, CommandTable, Compare, CompareOp, ExpectedLen, TableEntry};

/// Hard upper bound on table nesting; channels may configure less.
pub const MAX_TABLE_DEPTH: usize = 4;

/// Signature of a slave command handler.
pub type CommandHandler<C> = fn(&mut CommandContext<'_, C>) -> Disposition;

/// What a handler wants sent back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Plain ACK frame; anything staged in `reply` is dropped.
    SendAck,
    /// Send the reply staged in `reply` as is.
    SendResponse,
    /// Send the staged reply with this option byte.
    SendResponseWithOption(u8),
    /// NAK carrying a handler-chosen option code.
    SendNak(u8),
    /// Send nothing.
    SendNoResponse,
    /// NAK carrying a protocol diagnostic.
    Fail(NakCode),
}

/// Everything a handler may touch.
pub struct CommandContext<'a, C> {
    /// Id of the channel the request arrived on.
    pub channel: u8,
    /// Application state threaded through `process_byte`.
    pub app: &'a mut C,
    /// The decoded request.
    pub request: Frame<'a>,
    /// Reply frame, already begun with the request's command and option 0.
    pub reply: &'a mut FrameBuilder,
}

/// Why a frame reached no handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    IllegalCommand,
    IllegalLength,
    FlagMismatch,
    TooManyTables,
    NoCommandTable,
}

impl DispatchError {
    /// Code sent to the peer in the NAK option byte.
    pub fn nak_code(self) -> NakCode {
        match self {
            Self::IllegalCommand => NakCode::IllegalCommand,
            Self::IllegalLength => NakCode::IllegalLength,
            Self::FlagMismatch => NakCode::FlagMismatch,
            Self::TooManyTables | Self::NoCommandTable => NakCode::TableFault,
        }
    }
}

/// Per-channel dispatcher state: installed table and nesting stack.
pub struct Dispatcher<C: 'static> {
    table: Option<CommandTable<C>>,
    stack: Vec<(&'static [TableEntry<C>], usize), MAX_TABLE_DEPTH>,
    depth_limit: usize,
}

impl<C: 'static> Dispatcher<C> {
    pub fn new(depth_limit: usize) -> Self {
        Self {
            table: None,
            stack: Vec::new(),
            depth_limit: depth_limit.min(MAX_TABLE_DEPTH),
        }
    }

    pub fn set_table(&mut self, table: CommandTable<C>) {
        self.table = Some(table);
        self.stack.clear();
    }

    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }

    /// Current nesting depth (tables entered through links, not yet left).
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn reset(&mut self) {
        self.stack.clear();
    }

    /// Find the entry for `command`, checking its length and flag gates.
    pub fn lookup(
        &mut self,
        command: u8,
        payload_len: usize,
        flag: u8,
    ) -> Result<&'static CommandEntry<C>, DispatchError> {
        self.stack.clear();
        let table = self.table.ok_or(DispatchError::NoCommandTable)?;
        let mut entries = table.root();
        let mut idx = 0;

        loop {
            match entries.get(idx) {
                None | Some(TableEntry::End) => {
                    let Some((outer, at)) = self.stack.pop() else {
                        return Err(DispatchError::IllegalCommand);
                    };
                    entries = outer;
                    idx = at + 1;
                }
                Some(TableEntry::Link(inner)) => {
                    if self.stack.len() >= self.depth_limit {
                        return Err(DispatchError::TooManyTables);
                    }
                    // depth_limit <= MAX_TABLE_DEPTH, so there is room.
                    let _ = self.stack.push((entries, idx));
                    entries = inner;
                    idx = 0;
                }
                Some(TableEntry::Command(entry)) => {
                    if !entry.matches(command) {
                        idx += 1;
                        continue;
                    }
                    if !entry.length.accepts(payload_len) {
                        return Err(DispatchError::IllegalLength);
                    }
                    if !entry.compare.eval(flag) {
                        return Err(DispatchError::FlagMismatch);
                    }
                    return Ok(entry);
                }
            }
        }
    }

    /// Look up the request in `ctx` and run its handler.
    pub fn dispatch(
        &mut self,
        ctx: &mut CommandContext<'_, C>,
        flag: u8,
    ) -> Result<Disposition, DispatchError> {
        let command = ctx.request.command;
        let entry = self
            .lookup(command, ctx.request.payload.len(), flag)
            .inspect_err(|e| debug!("dispatch: {:#04x} rejected: {:?}", command, e))?;
        let disposition = (entry.handler)(ctx);
        debug!("dispatch: {:#04x} -> {:?}", command, disposition);
        Ok(disposition)
    }
}
