//! Slave-role behaviour: dispatch, replies and receive errors.

use bincmd::error::UsageError;
use bincmd::protocol::{ACK, BROADCAST, NAK};
use bincmd::{
    Addressing, BufferMode, ChannelConfig, ChecksumMode, CommandContext, CommandEntry,
    CommandTable, CompareOp, Disposition, Error, NakCode, RxStatus, TableEntry,
};

use crate::mock_sink::{Fields, channel, encode, feed};

// ── Fixture ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Slave {
    hits: u32,
    last_payload: Vec<u8>,
}

const CMD_PING: u8 = 0x30;
const CMD_ECHO: u8 = 0x31;
const CMD_WRITE: u8 = 0x32;
const CMD_LOCKED: u8 = 0x33;
const CMD_QUIET: u8 = 0x34;
const CMD_BUSY: u8 = 0x35;
const CMD_NESTED: u8 = 0x50;

fn ping(ctx: &mut CommandContext<'_, Slave>) -> Disposition {
    ctx.app.hits += 1;
    Disposition::SendAck
}

fn echo(ctx: &mut CommandContext<'_, Slave>) -> Disposition {
    ctx.app.hits += 1;
    ctx.app.last_payload = ctx.request.payload.to_vec();
    if ctx.reply.append_block(ctx.request.payload).is_err() {
        return Disposition::Fail(NakCode::BufferOverflow);
    }
    Disposition::SendResponseWithOption(ctx.request.option.wrapping_add(1))
}

fn write(ctx: &mut CommandContext<'_, Slave>) -> Disposition {
    ctx.app.hits += 1;
    ctx.app.last_payload = ctx.request.payload.to_vec();
    Disposition::SendAck
}

fn quiet(ctx: &mut CommandContext<'_, Slave>) -> Disposition {
    ctx.app.hits += 1;
    Disposition::SendNoResponse
}

fn busy(ctx: &mut CommandContext<'_, Slave>) -> Disposition {
    ctx.app.hits += 1;
    Disposition::SendNak(0x80)
}

static INNER: [TableEntry<Slave>; 2] = [
    TableEntry::Command(CommandEntry::new(CMD_NESTED, ping)),
    TableEntry::End,
];
static MIDDLE: [TableEntry<Slave>; 2] = [TableEntry::Link(&INNER), TableEntry::End];

static TABLE: [TableEntry<Slave>; 9] = [
    TableEntry::Command(CommandEntry::new(CMD_PING, ping).length(0)),
    TableEntry::Command(CommandEntry::new(CMD_ECHO, echo)),
    TableEntry::Command(CommandEntry::new(CMD_WRITE, write).length(2)),
    TableEntry::Command(CommandEntry::new(CMD_LOCKED, ping).when(CompareOp::Equal, 0x5A)),
    TableEntry::Command(CommandEntry::new(CMD_QUIET, quiet)),
    TableEntry::Command(CommandEntry::new(CMD_BUSY, busy)),
    // 0x60..=0x6F
    TableEntry::Command(CommandEntry::new(0x60, ping).mask(0x0F)),
    TableEntry::Link(&MIDDLE),
    TableEntry::End,
];

fn slave(config: ChannelConfig) -> bincmd::Channel<crate::mock_sink::MockSink, Slave> {
    let mut ch = channel(config);
    ch.set_command_table(CommandTable::new(&TABLE).unwrap());
    ch
}

fn p2p() -> ChannelConfig {
    ChannelConfig::default()
}

fn multidrop(local: u8) -> ChannelConfig {
    ChannelConfig {
        addressing: Addressing::Multidrop,
        sequence_numbers: true,
        checksum: ChecksumMode::Crc16,
        local_address: local,
        ..ChannelConfig::default()
    }
}

// ── Successful dispatch ───────────────────────────────────────

#[test]
fn matching_command_is_acked_with_exact_bytes() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let out = feed(&mut ch, &encode(layout, Fields::new(CMD_PING, &[])), 0, &mut app);
    assert_eq!(out, vec![Ok(RxStatus::Processed)]);
    assert_eq!(app.hits, 1);
    // DLE SOH ACK 00 DLE EOT xor
    assert_eq!(ch.sink().last(), Some(&[0x10, 0x01, 0x06, 0x00, 0x10, 0x04, 0x03][..]));
}

#[test]
fn response_carries_payload_and_option() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let request = encode(layout, Fields::new(CMD_ECHO, &[1, 2, 3]).option(7));
    assert_eq!(feed(&mut ch, &request, 0, &mut app), vec![Ok(RxStatus::Processed)]);
    assert_eq!(
        ch.sink().last().unwrap(),
        encode(layout, Fields::new(CMD_ECHO, &[1, 2, 3]).option(8)).as_slice()
    );
}

#[test]
fn escaped_bytes_reach_the_handler_decoded() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let request = encode(layout, Fields::new(CMD_ECHO, &[0x10, 0x10, 0xEF]));
    assert!(request.windows(2).any(|w| w == [0x10, 0xEF]));
    feed(&mut ch, &request, 0, &mut app);
    assert_eq!(app.last_payload, vec![0x10, 0x10, 0xEF]);
    assert_eq!(ch.payload(), &[0x10, 0x10, 0xEF]);
    assert_eq!(ch.payload_u16_be(0).unwrap(), 0x1010);
}

#[test]
fn masked_entry_covers_a_command_group() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    for cmd in [0x60, 0x6A, 0x6F] {
        assert_eq!(
            feed(&mut ch, &encode(layout, Fields::new(cmd, &[])), 0, &mut app),
            vec![Ok(RxStatus::Processed)]
        );
    }
    assert_eq!(app.hits, 3);
}

#[test]
fn linked_tables_are_searched() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let out = feed(&mut ch, &encode(layout, Fields::new(CMD_NESTED, &[])), 0, &mut app);
    assert_eq!(out, vec![Ok(RxStatus::Processed)]);
    assert_eq!(ch.table_depth(), 2);
}

#[test]
fn no_response_disposition_sends_nothing() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    feed(&mut ch, &encode(layout, Fields::new(CMD_QUIET, &[9])), 0, &mut app);
    assert_eq!(app.hits, 1);
    assert!(ch.sink().frames.is_empty());
}

#[test]
fn handler_nak_uses_its_own_code() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let out = feed(&mut ch, &encode(layout, Fields::new(CMD_BUSY, &[])), 0, &mut app);
    assert_eq!(out, vec![Ok(RxStatus::NotProcessed(0x80))]);
    assert_eq!(
        ch.sink().last().unwrap(),
        encode(layout, Fields::new(NAK, &[]).option(0x80)).as_slice()
    );
}

// ── Refusals ──────────────────────────────────────────────────

#[test]
fn refusals_nak_with_diagnostic_codes() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let cases = [
        (Fields::new(0x7F, &[]), 0, NakCode::IllegalCommand),
        (Fields::new(CMD_WRITE, &[1, 2, 3]), 0, NakCode::IllegalLength),
        (Fields::new(CMD_LOCKED, &[]), 0x00, NakCode::FlagMismatch),
    ];
    for (fields, flag, code) in cases {
        let out = feed(&mut ch, &encode(layout, fields), flag, &mut app);
        assert_eq!(out, vec![Ok(RxStatus::NotProcessed(code.code()))]);
        assert_eq!(
            ch.sink().last().unwrap(),
            encode(layout, Fields::new(NAK, &[]).option(code.code())).as_slice()
        );
    }
    assert_eq!(app.hits, 0);

    let out = feed(&mut ch, &encode(layout, Fields::new(CMD_LOCKED, &[])), 0x5A, &mut app);
    assert_eq!(out, vec![Ok(RxStatus::Processed)]);
    assert_eq!(ch.stats().naks_sent, 3);
}

#[test]
fn corrupt_trailer_is_nakked_and_not_dispatched() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let mut request = encode(layout, Fields::new(CMD_PING, &[]));
    *request.last_mut().unwrap() ^= 0xFF;
    assert_eq!(feed(&mut ch, &request, 0, &mut app), vec![Ok(RxStatus::ChecksumError)]);
    assert_eq!(app.hits, 0);
    assert_eq!(
        ch.sink().last().unwrap(),
        encode(layout, Fields::new(NAK, &[]).option(NakCode::ChecksumError.code())).as_slice()
    );
    assert_eq!(ch.stats().checksum_errors, 1);
}

#[test]
fn oversized_payload_is_reported_as_overflow() {
    let mut ch = slave(ChannelConfig {
        rx_capacity: 4,
        ..p2p()
    });
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let out = feed(&mut ch, &encode(layout, Fields::new(CMD_ECHO, &[0; 6])), 0, &mut app);
    assert_eq!(out, vec![Ok(RxStatus::Overflow)]);
    assert_eq!(app.hits, 0);
    assert_eq!(
        ch.sink().last().unwrap(),
        encode(layout, Fields::new(NAK, &[]).option(NakCode::BufferOverflow.code())).as_slice()
    );

    // Exactly at capacity is fine.
    let out = feed(&mut ch, &encode(layout, Fields::new(CMD_ECHO, &[0; 4])), 0, &mut app);
    assert_eq!(out, vec![Ok(RxStatus::Processed)]);
}

#[test]
fn missing_table_is_nakked_and_reported() {
    let mut ch = channel::<Slave>(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let out = feed(&mut ch, &encode(layout, Fields::new(CMD_PING, &[])), 0, &mut app);
    assert_eq!(out, vec![Err(Error::Usage(UsageError::NoCommandTable))]);
    assert_eq!(
        ch.sink().last().unwrap(),
        encode(layout, Fields::new(NAK, &[]).option(NakCode::TableFault.code())).as_slice()
    );
}

#[test]
fn nesting_past_configured_depth_is_an_error() {
    let mut ch = slave(ChannelConfig {
        table_depth: 1,
        ..p2p()
    });
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let out = feed(&mut ch, &encode(layout, Fields::new(CMD_NESTED, &[])), 0, &mut app);
    assert_eq!(out, vec![Err(Error::Usage(UsageError::TooManyTables))]);
    assert_eq!(app.hits, 0);
    assert_eq!(ch.table_depth(), 1);
}

#[test]
fn unsolicited_ack_and_nak_get_no_reply() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let mut wire = encode(layout, Fields::new(ACK, &[]));
    wire.extend(encode(layout, Fields::new(NAK, &[]).option(2)));
    assert_eq!(
        feed(&mut ch, &wire, 0, &mut app),
        vec![Ok(RxStatus::Unsolicited), Ok(RxStatus::Unsolicited)]
    );
    assert!(ch.sink().frames.is_empty());
}

#[test]
fn line_noise_between_frames_is_skipped() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let mut wire = vec![0x00, 0xFF, 0x10, 0x03, 0x55];
    wire.extend(encode(layout, Fields::new(CMD_PING, &[])));
    let out = feed(&mut ch, &wire, 0, &mut app);
    assert_eq!(out, vec![Ok(RxStatus::FramingError), Ok(RxStatus::Processed)]);
    assert_eq!(ch.stats().framing_errors, 1);
    assert_eq!(ch.stats().frames_ok, 1);
}

#[test]
fn sink_failure_surfaces_as_transmit_error() {
    let mut ch = slave(p2p());
    ch.sink_mut().fail = true;
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let out = feed(&mut ch, &encode(layout, Fields::new(CMD_PING, &[])), 0, &mut app);
    assert_eq!(
        out,
        vec![Err(Error::Transmit(bincmd::error::TransmitError::SinkFailed))]
    );
    assert_eq!(app.hits, 1);
}

// ── Multidrop ─────────────────────────────────────────────────

#[test]
fn multidrop_reply_is_addressed_to_the_requester() {
    let mut ch = slave(multidrop(0x22));
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let request = encode(layout, Fields::new(CMD_ECHO, &[0xAB]).route(0x22, 0x05).sequence(0x41));
    assert_eq!(feed(&mut ch, &request, 0, &mut app), vec![Ok(RxStatus::Processed)]);
    assert_eq!(ch.source_address(), 0x05);
    assert_eq!(ch.sequence(), 0x41);
    assert_eq!(
        ch.sink().last().unwrap(),
        encode(
            layout,
            Fields::new(CMD_ECHO, &[0xAB]).option(1).route(0x05, 0x22).sequence(0x41)
        )
        .as_slice()
    );
}

#[test]
fn frames_for_other_nodes_are_ignored() {
    let mut ch = slave(multidrop(0x22));
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let mut wire = encode(layout, Fields::new(CMD_PING, &[]).route(0x23, 0x05));
    wire.extend(encode(layout, Fields::new(CMD_PING, &[]).route(0x22, 0x05)));
    let out = feed(&mut ch, &wire, 0, &mut app);
    assert_eq!(out.first(), Some(&Ok(RxStatus::Ignored)));
    assert_eq!(out.last(), Some(&Ok(RxStatus::Processed)));
    assert_eq!(app.hits, 1);
    assert_eq!(ch.sink().frames.len(), 1);
    assert_eq!(ch.stats().ignored, 1);
}

#[test]
fn broadcast_runs_handler_without_reply() {
    let mut ch = slave(multidrop(0x22));
    let mut app = Slave::default();
    let layout = ch.config().layout();

    let broadcast = encode(layout, Fields::new(CMD_PING, &[]).route(0x00, 0x05));
    let out = feed(&mut ch, &broadcast, 0, &mut app);
    assert_eq!(out, vec![Ok(RxStatus::Processed)]);
    assert_eq!(app.hits, 1);
    assert!(ch.sink().frames.is_empty());

    // Refusals are not broadcast back either.
    feed(&mut ch, &encode(layout, Fields::new(0x7F, &[]).route(0x00, 0x05)), 0, &mut app);
    assert!(ch.sink().frames.is_empty());
}

#[test]
fn local_address_can_change_at_runtime() {
    let mut ch = slave(multidrop(0x22));
    let mut app = Slave::default();
    let layout = ch.config().layout();

    ch.set_local_address(0x30).unwrap();
    let old = encode(layout, Fields::new(CMD_PING, &[]).route(0x22, 0x05));
    let out = feed(&mut ch, &old, 0, &mut app);
    assert_eq!(out.first(), Some(&Ok(RxStatus::Ignored)));
    let new = encode(layout, Fields::new(CMD_PING, &[]).route(0x30, 0x05));
    let out = feed(&mut ch, &new, 0, &mut app);
    assert_eq!(out, vec![Ok(RxStatus::Processed)]);
    assert_eq!(
        ch.sink().last().unwrap(),
        encode(layout, Fields::new(ACK, &[]).route(0x05, 0x30)).as_slice()
    );
}

#[test]
fn broadcast_local_address_is_refused_in_multidrop() {
    let mut ch = slave(multidrop(0x22));
    assert!(matches!(ch.set_local_address(BROADCAST), Err(Error::Config(_))));
    assert_eq!(ch.config().local_address, 0x22);

    let mut p2p = slave(ChannelConfig::default());
    assert_eq!(p2p.set_local_address(BROADCAST), Ok(()));
}

// ── Buffer modes ──────────────────────────────────────────────

#[test]
fn single_buffer_refuses_transmit_mid_frame() {
    let mut ch = slave(ChannelConfig {
        buffers: BufferMode::Single,
        ..p2p()
    });
    let mut app = Slave::default();
    let layout = ch.config().layout();
    let request = encode(layout, Fields::new(CMD_WRITE, &[4, 5]));

    feed(&mut ch, &request[..3], 0, &mut app);
    assert!(ch.is_busy());
    assert_eq!(ch.begin_frame(0x40, 0), Err(Error::Usage(UsageError::ChannelBusy)));

    feed(&mut ch, &request[3..], 0, &mut app);
    assert_eq!(app.last_payload, vec![4, 5]);
    // Reply staging reused the buffer.
    assert_eq!(ch.payload_len(), 0);
    assert!(ch.begin_frame(0x40, 0).is_ok());
}

#[test]
fn dual_buffer_keeps_payload_after_reply() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();

    feed(&mut ch, &encode(layout, Fields::new(CMD_WRITE, &[4, 5])), 0, &mut app);
    assert_eq!(ch.payload(), &[4, 5]);
    assert_eq!(ch.payload_byte(1), Ok(5));
    assert_eq!(ch.payload_byte(2), Err(Error::Usage(UsageError::IllegalBufferIndex(2))));
}

#[test]
fn reset_aborts_a_partial_frame() {
    let mut ch = slave(p2p());
    let mut app = Slave::default();
    let layout = ch.config().layout();
    let request = encode(layout, Fields::new(CMD_PING, &[]));

    feed(&mut ch, &request[..4], 0, &mut app);
    assert!(ch.is_busy());
    ch.reset();
    assert!(!ch.is_busy());
    assert_eq!(feed(&mut ch, &request, 0, &mut app), vec![Ok(RxStatus::Processed)]);
}
