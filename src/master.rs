//! Master-role transaction sequencing.
//!
//! Flow: `send(index)` → request frame on the wire → `AwaitingResponse`
//! → next decoded frame is the response → callback → `Idle`.
//!
//! At most one transaction is in flight per channel. With a non-zero
//! response timeout, [`Master::tick`] resends the request up to the
//! configured retry count and then gives up through the error callback.
//! The request's wire bytes are kept here, so a resend repeats the request
//! even if other frames went out on the channel in between.
//!
//! With sequence numbers on, only a frame carrying the in-flight sequence
//! is a response. A late copy of the last closed transaction's reply is
//! reported as stale.

use core::fmt;
use heapless::Vec;
use log::{info, warn};

use crate::dispatch::ExpectedLen;
use crate::error::{Result, RoleError};
use crate::protocol::{ACK, MAX_ENCODED_FRAME, NAK};
use crate::protocol::builder::FrameBuilder;
use crate::protocol::receiver::Frame;

/// Stages the request payload after the frame is begun.
pub type RequestFn<C> = fn(&mut C, &mut FrameBuilder) -> Result<()>;
/// Consumes a correlated response.
pub type ResponseFn<C> = fn(&mut C, &Frame<'_>);
/// Reports a failed transaction.
pub type ErrorFn<C> = fn(&mut C, MasterError);

// ── Error type ────────────────────────────────────────────────

/// Why a master transaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterError {
    /// The reply's checksum did not match.
    Checksum,
    /// The reply's payload exceeded the receive capacity.
    Overflow,
    /// The peer answered with a NAK carrying this code.
    Nak(u8),
    /// The reply's payload length was not the expected one.
    LengthMismatch,
    /// No reply within the timeout, retries exhausted.
    Timeout,
}

impl fmt::Display for MasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checksum => write!(f, "response checksum error"),
            Self::Overflow => write!(f, "response overflowed receive buffer"),
            Self::Nak(code) => write!(f, "peer NAK (code {code:#04x})"),
            Self::LengthMismatch => write!(f, "unexpected response length"),
            Self::Timeout => write!(f, "no response"),
        }
    }
}

// ── Command table ─────────────────────────────────────────────

/// One request the master knows how to issue.
pub struct MasterCommand<C: 'static> {
    pub command: u8,
    pub option: u8,
    pub response_len: ExpectedLen,
    pub request: Option<RequestFn<C>>,
    pub response: Option<ResponseFn<C>>,
    pub error: Option<ErrorFn<C>>,
}

impl<C: 'static> MasterCommand<C> {
    pub const fn new(command: u8) -> Self {
        Self {
            command,
            option: 0,
            response_len: ExpectedLen::Any,
            request: None,
            response: None,
            error: None,
        }
    }

    pub const fn option(self, option: u8) -> Self {
        Self { option, ..self }
    }

    pub const fn response_len(self, len: u16) -> Self {
        Self {
            response_len: ExpectedLen::Exactly(len),
            ..self
        }
    }

    pub const fn on_request(self, f: RequestFn<C>) -> Self {
        Self {
            request: Some(f),
            ..self
        }
    }

    pub const fn on_response(self, f: ResponseFn<C>) -> Self {
        Self {
            response: Some(f),
            ..self
        }
    }

    pub const fn on_error(self, f: ErrorFn<C>) -> Self {
        Self {
            error: Some(f),
            ..self
        }
    }
}

// ── State machine ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Idle,
    AwaitingResponse {
        /// Index into the master table.
        index: usize,
        sequence: u8,
        elapsed_ms: u32,
        retries_left: u8,
    },
}

/// What the channel must do after a timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Nothing,
    /// Resend the last request frame.
    Resend,
    /// Retries exhausted; the transaction has been closed.
    TimedOut,
}

/// Result of handing the master a completed receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Response,
    Failed(MasterError),
}

/// Master-role state for one channel.
pub struct Master<C: 'static> {
    table: &'static [MasterCommand<C>],
    state: MasterState,
    retries: u8,
    timeout_ms: u32,
    check_sequence: bool,
    /// Wire bytes of the in-flight request.
    request: Vec<u8, MAX_ENCODED_FRAME>,
    /// Sequence and command of the last closed transaction.
    closed: Option<(u8, u8)>,
}

impl<C: 'static> Master<C> {
    pub fn new(retries: u8, timeout_ms: u32, check_sequence: bool) -> Self {
        Self {
            table: &[],
            state: MasterState::Idle,
            retries,
            timeout_ms,
            check_sequence,
            request: Vec::new(),
            closed: None,
        }
    }

    /// Swap the master table. Refused while a request awaits its response.
    pub fn set_table(&mut self, table: &'static [MasterCommand<C>]) -> Result<()> {
        if self.is_awaiting() {
            return Err(RoleError::MasterBusy.into());
        }
        self.table = table;
        Ok(())
    }

    pub fn state(&self) -> MasterState {
        self.state
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self.state, MasterState::AwaitingResponse { .. })
    }

    /// Check a send is possible and return the command to build.
    pub fn prepare(&self, index: usize) -> Result<&'static MasterCommand<C>> {
        if self.is_awaiting() {
            return Err(RoleError::MasterBusy.into());
        }
        self.table
            .get(index)
            .ok_or(RoleError::IllegalMasterCommand(index).into())
    }

    /// The request for `index` is on the wire as `wire`.
    pub fn sent(&mut self, index: usize, sequence: u8, wire: &[u8]) {
        info!("master: request {} sent, awaiting response", index);
        self.request.clear();
        // The builder never encodes more than MAX_ENCODED_FRAME bytes.
        let _ = self.request.extend_from_slice(wire);
        self.state = MasterState::AwaitingResponse {
            index,
            sequence,
            elapsed_ms: 0,
            retries_left: self.retries,
        };
    }

    /// Wire bytes of the in-flight (or last) request.
    pub fn request(&self) -> &[u8] {
        &self.request
    }

    /// True when `frame` may answer the in-flight request.
    pub fn is_response(&self, frame: &Frame<'_>) -> bool {
        match self.state {
            MasterState::AwaitingResponse { sequence, .. } => {
                !self.check_sequence || frame.sequence == sequence
            }
            MasterState::Idle => false,
        }
    }

    /// True when `frame` is a late reply to the last closed transaction,
    /// e.g. the peer answering a resent request a second time.
    pub fn is_stale(&self, frame: &Frame<'_>) -> bool {
        let Some((sequence, command)) = self.closed else {
            return false;
        };
        self.check_sequence
            && frame.sequence == sequence
            && (frame.command == command || frame.command == ACK || frame.command == NAK)
    }

    /// Correlate a completed receive with the in-flight request and run the
    /// matching callback. `outcome` is `Ok(frame)` for a checksum-valid
    /// frame, or the receive failure.
    pub fn complete(
        &mut self,
        app: &mut C,
        outcome: core::result::Result<&Frame<'_>, MasterError>,
    ) -> Option<Completion> {
        let MasterState::AwaitingResponse { index, .. } = self.state else {
            return None;
        };
        self.close();
        let cmd = self.table.get(index)?;

        let result = outcome.and_then(|frame| {
            if frame.command == NAK {
                Err(MasterError::Nak(frame.option))
            } else if !cmd.response_len.accepts(frame.payload.len()) {
                Err(MasterError::LengthMismatch)
            } else {
                Ok(frame)
            }
        });

        match result {
            Ok(frame) => {
                if let Some(on_response) = cmd.response {
                    on_response(app, frame);
                }
                Some(Completion::Response)
            }
            Err(e) => {
                warn!("master: request {} failed: {}", index, e);
                self.fail(app, index, e);
                Some(Completion::Failed(e))
            }
        }
    }

    /// Advance the response timer by `elapsed_ms`.
    pub fn tick(&mut self, app: &mut C, elapsed_ms: u32) -> TickAction {
        let MasterState::AwaitingResponse {
            index,
            sequence,
            elapsed_ms: waited,
            retries_left,
        } = self.state
        else {
            return TickAction::Nothing;
        };
        if self.timeout_ms == 0 {
            return TickAction::Nothing;
        }

        let waited = waited.saturating_add(elapsed_ms);
        if waited < self.timeout_ms {
            self.state = MasterState::AwaitingResponse {
                index,
                sequence,
                elapsed_ms: waited,
                retries_left,
            };
            return TickAction::Nothing;
        }

        if retries_left > 0 {
            info!("master: request {} timed out, {} retries left", index, retries_left - 1);
            self.state = MasterState::AwaitingResponse {
                index,
                sequence,
                elapsed_ms: 0,
                retries_left: retries_left - 1,
            };
            TickAction::Resend
        } else {
            warn!("master: request {} timed out", index);
            self.close();
            self.fail(app, index, MasterError::Timeout);
            TickAction::TimedOut
        }
    }

    /// Drop any in-flight transaction without callbacks.
    pub fn abort(&mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let MasterState::AwaitingResponse { index, sequence, .. } = self.state {
            self.closed = self.table.get(index).map(|cmd| (sequence, cmd.command));
        }
        self.state = MasterState::Idle;
    }

    fn fail(&self, app: &mut C, index: usize, e: MasterError) {
        if let Some(on_error) = self.table.get(index).and_then(|cmd| cmd.error) {
            on_error(app, e);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
