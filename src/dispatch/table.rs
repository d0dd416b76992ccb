//! Slave command tables.
//!
//! Tables are `'static` slices of [`TableEntry`] ending in
//! [`TableEntry::End`]. A [`TableEntry::Link`] splices another table in at
//! that position, so a product can overlay extra command sets on a base
//! table without rebuilding it:
//!
//! ```text
//!  ROOT ─┬─ Command 0x20
//!        ├─ Link ──▶ DIAG ─┬─ Command 0x70
//!        │                 ├─ Command 0x71
//!        │                 └─ End  (back to ROOT, next entry)
//!        ├─ Command 0x30 (mask 0x0F: 0x30..=0x3F)
//!        └─ End  (no match: IllegalCommand)
//! ```

use super::{CommandHandler, MAX_TABLE_DEPTH};
use crate::error::{Result, UsageError};

/// Payload length an entry accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedLen {
    Any,
    Exactly(u16),
}

impl ExpectedLen {
    pub fn accepts(self, len: usize) -> bool {
        match self {
            Self::Any => true,
            Self::Exactly(n) => n as usize == len,
        }
    }
}

/// Comparison applied as `runtime_flag <op> value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Always,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    /// Every bit of `value` is set in the flag.
    AllBitsSet,
    /// At least one bit of `value` is set in the flag.
    AnyBitSet,
    /// No bit of `value` is set in the flag.
    NoBitsSet,
}

/// Gate on a caller-supplied runtime flag (typically the system mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compare {
    pub op: CompareOp,
    pub value: u8,
}

impl Compare {
    pub const ALWAYS: Self = Self {
        op: CompareOp::Always,
        value: 0,
    };

    pub const fn new(op: CompareOp, value: u8) -> Self {
        Self { op, value }
    }

    pub fn eval(self, flag: u8) -> bool {
        let v = self.value;
        match self.op {
            CompareOp::Always => true,
            CompareOp::Equal => flag == v,
            CompareOp::NotEqual => flag != v,
            CompareOp::Less => flag < v,
            CompareOp::LessOrEqual => flag <= v,
            CompareOp::Greater => flag > v,
            CompareOp::GreaterOrEqual => flag >= v,
            CompareOp::AllBitsSet => flag & v == v,
            CompareOp::AnyBitSet => flag & v != 0,
            CompareOp::NoBitsSet => flag & v == 0,
        }
    }
}

/// One command row.
pub struct CommandEntry<C: 'static> {
    pub command: u8,
    /// Bits ignored when matching, for sub-opcode groups.
    pub mask: u8,
    pub length: ExpectedLen,
    pub compare: Compare,
    pub handler: CommandHandler<C>,
}

impl<C: 'static> CommandEntry<C> {
    /// Exact command match, any length, no flag gate.
    pub const fn new(command: u8, handler: CommandHandler<C>) -> Self {
        Self {
            command,
            mask: 0,
            length: ExpectedLen::Any,
            compare: Compare::ALWAYS,
            handler,
        }
    }

    pub const fn mask(self, mask: u8) -> Self {
        Self { mask, ..self }
    }

    pub const fn length(self, len: u16) -> Self {
        Self {
            length: ExpectedLen::Exactly(len),
            ..self
        }
    }

    pub const fn when(self, op: CompareOp, value: u8) -> Self {
        Self {
            compare: Compare::new(op, value),
            ..self
        }
    }

    pub fn matches(&self, command: u8) -> bool {
        command & !self.mask == self.command & !self.mask
    }
}

/// A row of a command table.
pub enum TableEntry<C: 'static> {
    Command(CommandEntry<C>),
    /// Continue in another table; resume here when it ends.
    Link(&'static [TableEntry<C>]),
    /// Terminates the table.
    End,
}

/// A root table that has been checked for termination.
pub struct CommandTable<C: 'static> {
    root: &'static [TableEntry<C>],
}

impl<C: 'static> Clone for CommandTable<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: 'static> Copy for CommandTable<C> {}

impl<C: 'static> CommandTable<C> {
    /// Validate `root` and every table reachable through links (up to
    /// [`MAX_TABLE_DEPTH`] levels): each must end in exactly one `End`.
    pub fn new(root: &'static [TableEntry<C>]) -> Result<Self> {
        validate(root, 0)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &'static [TableEntry<C>] {
        self.root
    }
}

fn validate<C: 'static>(entries: &'static [TableEntry<C>], depth: usize) -> Result<()> {
    let Some((TableEntry::End, body)) = entries.split_last() else {
        return Err(UsageError::MalformedTable.into());
    };
    for entry in body {
        match entry {
            TableEntry::End => return Err(UsageError::MalformedTable.into()),
            TableEntry::Link(inner) if depth < MAX_TABLE_DEPTH => validate(inner, depth + 1)?,
            TableEntry::Link(_) | TableEntry::Command(_) => {}
        }
    }
    Ok(())
}
