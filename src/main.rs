//! bincmd loopback demo.
//!
//! Two channels in one process, wired back to back:
//!
//! ```text
//!  ┌──────────────────┐   request frames    ┌──────────────────┐
//!  │ channel 0        │ ──────────────────▶ │ channel 1        │
//!  │ master, CRC16    │                     │ slave, CRC16     │
//!  │ multidrop addr 1 │ ◀────────────────── │ multidrop addr 7 │
//!  └──────────────────┘   ACK / response    └──────────────────┘
//! ```
//!
//! Each channel's sink is a fixed byte queue; the pump loop drains one
//! queue into the other channel's `process_byte` until both are quiet.

use anyhow::{Context, Result, anyhow};
use log::{LevelFilter, info, warn};

use bincmd::{
    Addressing, ChannelConfig, ChecksumMode, CommandContext, CommandEntry, CommandTable,
    CompareOp, Disposition, Frame, FrameBuilder, MasterCommand, MasterError, NakCode, Registry,
    RxStatus, TableEntry,
};

// ── Application state ─────────────────────────────────────────

const CMD_READ_TEMP: u8 = 0x20;
const CMD_SET_SETPOINT: u8 = 0x21;
const CMD_DIAG_BASE: u8 = 0x40;

/// Slave mode flag: setpoint writes are only accepted when unlocked.
const FLAG_UNLOCKED: u8 = 0x01;

#[derive(Debug, Default)]
struct Device {
    // Slave side
    temperature_dc: u16,
    setpoint: u8,
    diag_hits: u32,

    // Master side
    last_temperature: Option<u16>,
    failures: Vec<MasterError>,
}

// ── Slave command table ───────────────────────────────────────

fn read_temp(ctx: &mut CommandContext<'_, Device>) -> Disposition {
    match ctx.reply.append_u16_be(ctx.app.temperature_dc) {
        Ok(()) => Disposition::SendResponse,
        Err(_) => Disposition::Fail(NakCode::BufferOverflow),
    }
}

fn set_setpoint(ctx: &mut CommandContext<'_, Device>) -> Disposition {
    ctx.app.setpoint = ctx.request.payload[0];
    Disposition::SendAck
}

fn diag(ctx: &mut CommandContext<'_, Device>) -> Disposition {
    ctx.app.diag_hits += 1;
    Disposition::SendResponseWithOption(ctx.request.command & 0x0F)
}

static DIAG_TABLE: [TableEntry<Device>; 2] = [
    TableEntry::Command(CommandEntry::new(CMD_DIAG_BASE, diag).mask(0x0F)),
    TableEntry::End,
];

static SLAVE_TABLE: [TableEntry<Device>; 4] = [
    TableEntry::Command(CommandEntry::new(CMD_READ_TEMP, read_temp).length(0)),
    TableEntry::Command(
        CommandEntry::new(CMD_SET_SETPOINT, set_setpoint)
            .length(1)
            .when(CompareOp::AllBitsSet, FLAG_UNLOCKED),
    ),
    TableEntry::Link(&DIAG_TABLE),
    TableEntry::End,
];

// ── Master command table ──────────────────────────────────────

/// Replies to manually framed requests arrive while no transaction is open.
fn manual_reply(ctx: &mut CommandContext<'_, Device>) -> Disposition {
    info!(
        "manual reply {:#04x} option {} payload {:02x?}",
        ctx.request.command, ctx.request.option, ctx.request.payload
    );
    Disposition::SendNoResponse
}

static MASTER_RX_TABLE: [TableEntry<Device>; 2] = [
    TableEntry::Command(CommandEntry::new(0x00, manual_reply).mask(0xFF)),
    TableEntry::End,
];

fn temp_response(app: &mut Device, frame: &Frame<'_>) {
    app.last_temperature = Some(u16::from_be_bytes([frame.payload[0], frame.payload[1]]));
}

fn setpoint_request(_app: &mut Device, builder: &mut FrameBuilder) -> bincmd::Result<()> {
    builder.append_byte(55)
}

fn record_failure(app: &mut Device, e: MasterError) {
    app.failures.push(e);
}

static MASTER_TABLE: [MasterCommand<Device>; 3] = [
    MasterCommand::new(CMD_READ_TEMP)
        .response_len(2)
        .on_response(temp_response)
        .on_error(record_failure),
    MasterCommand::new(CMD_SET_SETPOINT)
        .on_request(setpoint_request)
        .on_error(record_failure),
    MasterCommand::new(0x7E).on_error(record_failure),
];

// ── Loopback pump ─────────────────────────────────────────────

type Queue = heapless::Vec<u8, 1024>;

const MASTER: u8 = 0;
const SLAVE: u8 = 1;
const SLAVE_ADDR: u8 = 7;

/// Move queued bytes between the two channels until neither has output.
fn pump(registry: &mut Registry<Queue, Device, 2>, app: &mut Device, flag: u8) -> Result<()> {
    loop {
        let mut moved = false;
        for (from, to) in [(MASTER, SLAVE), (SLAVE, MASTER)] {
            let bytes: Queue = core::mem::take(registry.channel_mut(from)?.sink_mut());
            moved |= !bytes.is_empty();
            for &b in &bytes {
                match registry.process_byte(to, b, flag, app) {
                    Ok(RxStatus::Idle | RxStatus::Busy) => {}
                    Ok(status) => info!("channel {} -> {:?}", to, status),
                    Err(e) => warn!("channel {}: {}", to, e),
                }
            }
        }
        if !moved {
            return Ok(());
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Debug)
        .init();
    info!("bincmd loopback v{}", env!("CARGO_PKG_VERSION"));

    let base = ChannelConfig {
        addressing: Addressing::Multidrop,
        sequence_numbers: true,
        checksum: ChecksumMode::Crc16,
        ..ChannelConfig::default()
    };
    let master_cfg = ChannelConfig {
        local_address: 1,
        master: true,
        retries: 1,
        response_timeout_ms: 50,
        ..base.clone()
    };
    let slave_cfg = ChannelConfig {
        local_address: SLAVE_ADDR,
        ..base
    };

    // Persisted parameter blocks travel as postcard bytes.
    let slave_cfg = ChannelConfig::from_bytes(&slave_cfg.to_bytes()?)
        .context("slave parameter block")?;

    let mut registry: Registry<Queue, Device, 2> = Registry::new();
    registry.add(master_cfg, Queue::new())?;
    registry.add(slave_cfg, Queue::new())?;
    registry
        .channel_mut(SLAVE)?
        .set_command_table(CommandTable::new(&SLAVE_TABLE)?);
    registry.channel_mut(MASTER)?.set_master_table(&MASTER_TABLE)?;
    registry
        .channel_mut(MASTER)?
        .set_command_table(CommandTable::new(&MASTER_RX_TABLE)?);
    registry.set_destination_address(MASTER, SLAVE_ADDR)?;

    let mut app = Device {
        temperature_dc: 215,
        ..Device::default()
    };

    // 1. Read temperature.
    registry.master_send(MASTER, 0, &mut app)?;
    pump(&mut registry, &mut app, 0)?;
    info!("temperature: {:?} (x0.1 C)", app.last_temperature);

    // 2. Setpoint write while locked: NAKed with a flag mismatch.
    registry.master_send(MASTER, 1, &mut app)?;
    pump(&mut registry, &mut app, 0)?;

    // 3. Same write, unlocked.
    registry.master_send(MASTER, 1, &mut app)?;
    pump(&mut registry, &mut app, FLAG_UNLOCKED)?;
    info!("slave setpoint: {}", app.setpoint);

    // 4. Manual frame into the linked diagnostics table.
    registry.begin_frame(MASTER, CMD_DIAG_BASE | 0x03, 0)?;
    registry.set_sequence(MASTER, 0x80)?;
    registry.append_block(MASTER, &[0x10, 0xEF])?;
    registry.transmit(MASTER)?;
    pump(&mut registry, &mut app, 0)?;

    // 5. Unknown command with a dead slave: resend once, then time out.
    registry.master_send(MASTER, 2, &mut app)?;
    registry.channel_mut(MASTER)?.sink_mut().clear();
    for _ in 0..4 {
        registry.tick_all(30, &mut app)?;
        registry.channel_mut(MASTER)?.sink_mut().clear();
    }

    for channel in registry.iter() {
        let stats = serde_json::to_string(&channel.stats()).map_err(|e| anyhow!("stats: {e}"))?;
        info!("channel {} stats: {}", channel.id(), stats);
    }
    if !app.failures.is_empty() {
        warn!("master failures: {:?}", app.failures);
    }
    Ok(())
}
