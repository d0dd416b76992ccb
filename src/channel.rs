//! One protocol channel: receiver, builder, dispatcher and master role
//! bound to a single byte sink.
//!
//! ```text
//!            process_byte(b, flag, app)
//!                      │
//!                      ▼
//!              ┌───────────────┐   Frame / ChecksumError / Overflow
//!              │ FrameReceiver │──────────────┬───────────────────────┐
//!              └───────────────┘              │ master awaiting?      │ otherwise
//!                                             ▼                       ▼
//!                                      ┌────────────┐          ┌────────────┐
//!                                      │   Master   │          │ Dispatcher │──▶ handler
//!                                      └────────────┘          └────────────┘
//!                                        callbacks               Disposition
//!                                                                     │
//!              ┌───────────────┐                                      │
//!   ByteSink ◀─│ FrameBuilder  │◀───────── ACK / response / NAK ──────┘
//!              └───────────────┘
//! ```
//!
//! The channel is not reentrant: each `process_byte` call must return before
//! the next byte for the same channel is delivered. Distinct channels share
//! nothing and may be driven from different contexts.

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{BufferMode, ChannelConfig};
use crate::dispatch::{CommandContext, CommandTable, DispatchError, Dispatcher, Disposition};
use crate::error::{NakCode, Result, RoleError, TransmitError, UsageError};
use crate::master::{Completion, Master, MasterCommand, MasterError, MasterState, TickAction};
use crate::protocol::builder::FrameBuilder;
use crate::protocol::receiver::{Frame, FrameReceiver, RxEvent};
use crate::protocol::sink::ByteSink;
use crate::protocol::{ACK, NAK};

/// Outcome of [`Channel::process_byte`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxStatus {
    /// Not inside a frame.
    Idle,
    /// Inside a frame.
    Busy,
    /// A command was dispatched and handled (reply sent if one was due).
    Processed,
    /// A frame arrived but was refused; a NAK with this code was due.
    NotProcessed(u8),
    /// Trailer mismatch; NAK sent.
    ChecksumError,
    /// Payload exceeded the receive capacity; NAK sent.
    Overflow,
    /// Frame for another node.
    Ignored,
    /// Framing error; receiver resynchronised.
    FramingError,
    /// ACK/NAK with no transaction waiting for it, or a late or
    /// out-of-sequence reply to a master request; nothing is sent back.
    Unsolicited,
    /// Master transaction completed with a response.
    Response,
    /// Master transaction failed.
    ResponseFailed(MasterError),
}

/// Per-channel counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub frames_ok: u32,
    pub checksum_errors: u32,
    pub framing_errors: u32,
    pub overflows: u32,
    pub ignored: u32,
    pub naks_sent: u32,
}

/// A protocol instance.
pub struct Channel<S: ByteSink, C: 'static> {
    id: u8,
    config: ChannelConfig,
    sink: S,
    receiver: FrameReceiver,
    builder: FrameBuilder,
    dispatcher: Dispatcher<C>,
    master: Option<Master<C>>,
    next_sequence: u8,
    stats: ChannelStats,
}

impl<S: ByteSink, C: 'static> Channel<S, C> {
    /// Build a channel from a validated configuration.
    pub fn new(id: u8, config: ChannelConfig, sink: S) -> Result<Self> {
        config.validate()?;
        let layout = config.layout();
        info!(
            "channel {}: {:?} {:?} seq={} master={}",
            id, config.addressing, config.checksum, config.sequence_numbers, config.master
        );
        Ok(Self {
            id,
            receiver: FrameReceiver::new(layout, config.local_address, config.rx_capacity as usize),
            builder: FrameBuilder::new(layout, config.local_address, config.tx_capacity as usize),
            dispatcher: Dispatcher::new(config.table_depth as usize),
            master: config.master.then(|| {
                Master::new(config.retries, config.response_timeout_ms, config.sequence_numbers)
            }),
            next_sequence: 0,
            stats: ChannelStats::default(),
            config,
            sink,
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Install the slave command table.
    pub fn set_command_table(&mut self, table: CommandTable<C>) {
        self.dispatcher.set_table(table);
    }

    /// Install the master command table. Refused while a request awaits
    /// its response.
    pub fn set_master_table(&mut self, table: &'static [MasterCommand<C>]) -> Result<()> {
        let master = self.master.as_mut().ok_or(RoleError::NotMaster)?;
        master.set_table(table)
    }

    pub fn master_state(&self) -> Option<MasterState> {
        self.master.as_ref().map(Master::state)
    }

    /// Current dispatcher nesting depth.
    pub fn table_depth(&self) -> usize {
        self.dispatcher.depth()
    }

    // -----------------------------------------------------------------------
    // Transmit side
    // -----------------------------------------------------------------------

    pub fn begin_frame(&mut self, command: u8, option: u8) -> Result<()> {
        self.claim_tx_buffer()?;
        self.builder.begin_frame(command, option);
        Ok(())
    }

    pub fn set_option(&mut self, option: u8) {
        self.builder.set_option(option);
    }

    pub fn set_sequence(&mut self, sequence: u8) {
        self.builder.set_sequence(sequence);
    }

    pub fn set_destination_address(&mut self, address: u8) {
        self.builder.set_destination_address(address);
    }

    /// Change this node's address. The broadcast address is refused in
    /// multidrop mode.
    pub fn set_local_address(&mut self, address: u8) -> Result<()> {
        ChannelConfig {
            local_address: address,
            ..self.config.clone()
        }
        .validate()?;
        self.config.local_address = address;
        self.receiver.set_local_address(address);
        self.builder.set_local_address(address);
        Ok(())
    }

    pub fn append_byte(&mut self, byte: u8) -> Result<()> {
        self.builder.append_byte(byte)
    }

    pub fn append_block(&mut self, bytes: &[u8]) -> Result<()> {
        self.builder.append_block(bytes)
    }

    /// Direct access to the staged frame, e.g. for multi-byte helpers.
    pub fn builder_mut(&mut self) -> &mut FrameBuilder {
        &mut self.builder
    }

    /// Encode the staged frame and hand it to the sink.
    pub fn transmit(&mut self) -> Result<usize> {
        self.builder.finalize(&mut self.sink)
    }

    // -----------------------------------------------------------------------
    // Receive side
    // -----------------------------------------------------------------------

    /// Feed one byte from the transport. `flag` is the runtime value the
    /// command table's comparison gates are evaluated against.
    pub fn process_byte(&mut self, byte: u8, flag: u8, app: &mut C) -> Result<RxStatus> {
        let event = self.receiver.push(byte);
        match event {
            RxEvent::Idle => Ok(RxStatus::Idle),
            RxEvent::Receiving => Ok(RxStatus::Busy),
            RxEvent::Ignored => {
                self.stats.ignored = self.stats.ignored.wrapping_add(1);
                Ok(RxStatus::Ignored)
            }
            RxEvent::FramingError => {
                self.stats.framing_errors = self.stats.framing_errors.wrapping_add(1);
                Ok(RxStatus::FramingError)
            }
            RxEvent::Frame | RxEvent::ChecksumError | RxEvent::Overflow => {
                self.frame_complete(event, flag, app)
            }
        }
    }

    /// True while a frame is being received.
    pub fn is_busy(&self) -> bool {
        self.receiver.is_busy()
    }

    /// The last decoded frame.
    pub fn frame(&self) -> Frame<'_> {
        self.receiver.frame()
    }

    pub fn command(&self) -> u8 {
        self.receiver.frame().command
    }

    pub fn option(&self) -> u8 {
        self.receiver.frame().option
    }

    pub fn sequence(&self) -> u8 {
        self.receiver.frame().sequence
    }

    pub fn source_address(&self) -> u8 {
        self.receiver.frame().source
    }

    pub fn payload_len(&self) -> usize {
        self.receiver.frame().payload.len()
    }

    pub fn payload(&self) -> &[u8] {
        self.receiver.frame().payload
    }

    pub fn payload_byte(&self, index: usize) -> Result<u8> {
        self.receiver
            .frame()
            .payload
            .get(index)
            .copied()
            .ok_or(UsageError::IllegalBufferIndex(index).into())
    }

    /// Big-endian `u16` at `offset` in the decoded payload.
    pub fn payload_u16_be(&self, offset: usize) -> Result<u16> {
        Ok(u16::from_be_bytes([self.payload_byte(offset)?, self.payload_byte(offset + 1)?]))
    }

    /// Little-endian `u16` at `offset` in the decoded payload.
    pub fn payload_u16_le(&self, offset: usize) -> Result<u16> {
        Ok(u16::from_le_bytes([self.payload_byte(offset)?, self.payload_byte(offset + 1)?]))
    }

    // -----------------------------------------------------------------------
    // Master role
    // -----------------------------------------------------------------------

    /// Issue master request `index` from the installed master table.
    pub fn master_send(&mut self, index: usize, app: &mut C) -> Result<()> {
        if self.config.buffers == BufferMode::Single && self.receiver.is_busy() {
            return Err(UsageError::ChannelBusy.into());
        }
        let master = self.master.as_mut().ok_or(RoleError::NotMaster)?;
        let cmd = master.prepare(index)?;

        if self.config.sequence_numbers {
            self.next_sequence = self.next_sequence.wrapping_add(1);
            self.builder.set_sequence(self.next_sequence);
        }
        if self.config.buffers == BufferMode::Single {
            self.receiver.invalidate_payload();
        }
        self.builder.begin_frame(cmd.command, cmd.option);
        if let Some(build) = cmd.request {
            if let Err(e) = build(app, &mut self.builder) {
                self.builder.discard();
                return Err(e);
            }
        }
        self.builder.finalize(&mut self.sink)?;
        master.sent(index, self.builder.sequence(), self.builder.encoded());
        Ok(())
    }

    /// Advance the master response timer; resends or times out as configured.
    pub fn tick(&mut self, elapsed_ms: u32, app: &mut C) -> Result<TickAction> {
        let Some(master) = self.master.as_mut() else {
            return Ok(TickAction::Nothing);
        };
        let action = master.tick(app, elapsed_ms);
        if action == TickAction::Resend {
            let request = master.request();
            if let Err(e) = self.sink.transmit(request) {
                warn!(
                    "channel {}: byte sink rejected {}-byte resend: {:?}",
                    self.id,
                    request.len(),
                    e
                );
                return Err(TransmitError::SinkFailed.into());
            }
        }
        Ok(action)
    }

    /// Abort everything in progress: receive, staged transmit, nesting
    /// stack and any master transaction.
    pub fn reset(&mut self) {
        debug!("channel {}: reset", self.id);
        self.receiver.reset();
        self.builder.discard();
        self.dispatcher.reset();
        if let Some(master) = self.master.as_mut() {
            master.abort();
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn claim_tx_buffer(&mut self) -> Result<()> {
        if self.config.buffers == BufferMode::Single {
            if self.receiver.is_busy() {
                return Err(UsageError::ChannelBusy.into());
            }
            self.receiver.invalidate_payload();
        }
        Ok(())
    }

    fn frame_complete(&mut self, event: RxEvent, flag: u8, app: &mut C) -> Result<RxStatus> {
        let stats = &mut self.stats;
        match event {
            RxEvent::ChecksumError => {
                stats.checksum_errors = stats.checksum_errors.wrapping_add(1);
            }
            RxEvent::Overflow => stats.overflows = stats.overflows.wrapping_add(1),
            _ => stats.frames_ok = stats.frames_ok.wrapping_add(1),
        }

        if let Some(master) = self.master.as_mut() {
            let frame = self.receiver.frame();
            let decoded = event == RxEvent::Frame;
            if decoded && master.is_stale(&frame) {
                debug!("channel {}: late reply seq {} dropped", self.id, frame.sequence);
                return Ok(RxStatus::Unsolicited);
            }
            if master.is_awaiting() {
                if decoded && !master.is_response(&frame) {
                    debug!("channel {}: reply seq {} out of sequence", self.id, frame.sequence);
                    return Ok(RxStatus::Unsolicited);
                }
                let outcome = match event {
                    RxEvent::ChecksumError => Err(MasterError::Checksum),
                    RxEvent::Overflow => Err(MasterError::Overflow),
                    _ => Ok(&frame),
                };
                return Ok(match master.complete(app, outcome) {
                    Some(Completion::Response) => RxStatus::Response,
                    Some(Completion::Failed(e)) => RxStatus::ResponseFailed(e),
                    None => RxStatus::Unsolicited,
                });
            }
        }

        match event {
            RxEvent::ChecksumError => {
                warn!("channel {}: checksum error", self.id);
                self.reply_nak(NakCode::ChecksumError.code())?;
                Ok(RxStatus::ChecksumError)
            }
            RxEvent::Overflow => {
                warn!("channel {}: receive overflow", self.id);
                self.reply_nak(NakCode::BufferOverflow.code())?;
                Ok(RxStatus::Overflow)
            }
            _ => self.dispatch_frame(flag, app),
        }
    }

    fn dispatch_frame(&mut self, flag: u8, app: &mut C) -> Result<RxStatus> {
        let (command, source, sequence) = {
            let f = self.receiver.frame();
            (f.command, f.source, f.sequence)
        };
        if command == ACK || command == NAK {
            debug!("channel {}: unsolicited {:#04x}", self.id, command);
            return Ok(RxStatus::Unsolicited);
        }

        let saved = self.address_reply_to(source, sequence);
        self.builder.begin_frame(command, 0);
        let result = {
            let mut ctx = CommandContext {
                channel: self.id,
                app,
                request: self.receiver.frame(),
                reply: &mut self.builder,
            };
            self.dispatcher.dispatch(&mut ctx, flag)
        };

        let status = match result {
            Ok(disposition) => self.send_disposition(disposition),
            Err(e) => {
                let code = e.nak_code().code();
                self.builder.begin_frame(NAK, code);
                self.send_reply().map(|()| RxStatus::NotProcessed(code))
            }
        };
        self.restore_tx_addressing(saved);
        if self.config.buffers == BufferMode::Single {
            self.receiver.invalidate_payload();
        }

        match result {
            Err(DispatchError::TooManyTables) => Err(UsageError::TooManyTables.into()),
            Err(DispatchError::NoCommandTable) => Err(UsageError::NoCommandTable.into()),
            _ => status,
        }
    }

    fn send_disposition(&mut self, disposition: Disposition) -> Result<RxStatus> {
        let status = match disposition {
            Disposition::SendAck => {
                self.builder.begin_frame(ACK, 0);
                RxStatus::Processed
            }
            Disposition::SendResponse => RxStatus::Processed,
            Disposition::SendResponseWithOption(option) => {
                self.builder.set_option(option);
                RxStatus::Processed
            }
            Disposition::SendNak(code) => {
                self.builder.begin_frame(NAK, code);
                RxStatus::NotProcessed(code)
            }
            Disposition::Fail(code) => {
                self.builder.begin_frame(NAK, code.code());
                RxStatus::NotProcessed(code.code())
            }
            Disposition::SendNoResponse => {
                self.builder.discard();
                return Ok(RxStatus::Processed);
            }
        };
        self.send_reply()?;
        Ok(status)
    }

    /// NAK the last received frame outside of dispatch.
    fn reply_nak(&mut self, code: u8) -> Result<()> {
        let (source, sequence) = {
            let f = self.receiver.frame();
            (f.source, f.sequence)
        };
        let saved = self.address_reply_to(source, sequence);
        self.builder.begin_frame(NAK, code);
        let sent = self.send_reply();
        self.restore_tx_addressing(saved);
        sent
    }

    /// Send the staged reply unless the request was a broadcast.
    fn send_reply(&mut self) -> Result<()> {
        let broadcast = self.receiver.frame().is_broadcast(self.receiver.layout());
        if broadcast {
            debug!("channel {}: reply to broadcast suppressed", self.id);
            self.builder.discard();
            return Ok(());
        }
        if self.builder.command() == NAK {
            self.stats.naks_sent = self.stats.naks_sent.wrapping_add(1);
        }
        self.builder.finalize(&mut self.sink).map(|_| ())
    }

    /// Point the builder at the sender of a request; returns the previous
    /// destination and sequence so manual/master framing is undisturbed.
    fn address_reply_to(&mut self, source: u8, sequence: u8) -> (u8, u8) {
        let saved = (self.builder.destination_address(), self.builder.sequence());
        self.builder.set_destination_address(source);
        self.builder.set_sequence(sequence);
        saved
    }

    fn restore_tx_addressing(&mut self, (destination, sequence): (u8, u8)) {
        self.builder.set_destination_address(destination);
        self.builder.set_sequence(sequence);
    }
}
