//! Fuzz target: `Channel::process_byte` with a live command table
//!
//! Arbitrary bytes reach a slave channel whose table links into a nested
//! table. Processing must never panic; the only errors allowed are the
//! caller-visible table faults.
//!
//! cargo fuzz run fuzz_channel

#![no_main]

use bincmd::error::UsageError;
use bincmd::protocol::sink::NullSink;
use bincmd::{
    Channel, ChannelConfig, CommandContext, CommandEntry, CommandTable, CompareOp, Disposition,
    Error, TableEntry,
};
use libfuzzer_sys::fuzz_target;

fn echo(ctx: &mut CommandContext<'_, u32>) -> Disposition {
    *ctx.app += 1;
    match ctx.reply.append_block(ctx.request.payload) {
        Ok(()) => Disposition::SendResponse,
        Err(_) => Disposition::SendNak(0x40),
    }
}

static INNER: [TableEntry<u32>; 2] = [
    TableEntry::Command(CommandEntry::new(0x70, echo).mask(0x0F)),
    TableEntry::End,
];

static ROOT: [TableEntry<u32>; 4] = [
    TableEntry::Command(CommandEntry::new(0x20, echo).length(2)),
    TableEntry::Command(CommandEntry::new(0x21, echo).when(CompareOp::AnyBitSet, 0x03)),
    TableEntry::Link(&INNER),
    TableEntry::End,
];

fuzz_target!(|data: &[u8]| {
    let Some((&flag, bytes)) = data.split_first() else {
        return;
    };
    let Ok(table) = CommandTable::new(&ROOT) else {
        return;
    };
    let Ok(mut channel) = Channel::new(0, ChannelConfig::default(), NullSink) else {
        return;
    };
    channel.set_command_table(table);

    let mut handled = 0u32;
    for &b in bytes {
        match channel.process_byte(b, flag, &mut handled) {
            Ok(_) | Err(Error::Usage(UsageError::TooManyTables)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
});
