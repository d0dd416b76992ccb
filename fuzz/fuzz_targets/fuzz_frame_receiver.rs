//! Fuzz target: `FrameReceiver::push`
//!
//! The first byte picks the frame layout; the rest is fed to the receiver
//! one byte at a time. The receiver must never panic, never hold more
//! payload than its capacity, and must decode a clean frame after a reset.
//!
//! cargo fuzz run fuzz_frame_receiver

#![no_main]

use bincmd::protocol::checksum::ChecksumMode;
use bincmd::protocol::sink::NullSink;
use bincmd::{Addressing, FrameBuilder, FrameLayout, FrameReceiver, RxEvent};
use libfuzzer_sys::fuzz_target;

const CAPACITY: usize = 32;

fn layout(selector: u8) -> FrameLayout {
    FrameLayout {
        addressing: if selector & 1 == 0 {
            Addressing::PointToPoint
        } else {
            Addressing::Multidrop
        },
        sequence_numbers: selector & 2 != 0,
        checksum: match (selector >> 2) % 3 {
            0 => ChecksumMode::RunningXor,
            1 => ChecksumMode::TwosComplementSum,
            _ => ChecksumMode::Crc16,
        },
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&selector, bytes)) = data.split_first() else {
        return;
    };
    let layout = layout(selector);
    let mut rx = FrameReceiver::new(layout, 0x05, CAPACITY);

    for &b in bytes {
        let event = rx.push(b);
        assert!(rx.frame().payload.len() <= CAPACITY, "payload exceeds capacity");
        if event == RxEvent::Idle {
            assert!(!rx.is_busy());
        }
    }

    // After a reset the receiver must accept a well-formed frame.
    rx.reset();
    let mut builder = FrameBuilder::new(layout, 0x01, CAPACITY);
    builder.set_destination_address(0x05);
    builder.begin_frame(0x30, 0x00);
    let _ = builder.append_block(&bytes[..bytes.len().min(CAPACITY)]);
    if builder.finalize(&mut NullSink).is_ok() {
        let events: Vec<RxEvent> = builder.encoded().iter().map(|&b| rx.push(b)).collect();
        assert_eq!(events.last(), Some(&RxEvent::Frame));
    }
});
