//! Byte-sink abstraction: where finished frames go.
//!
//! Concrete implementations live with the board code:
//! - UART TX ring buffer (enqueue and return, drained by the TX ISR)
//! - RF modem packet queue
//! - USB CDC endpoint buffer
//!
//! The engine only ever hands over a complete encoded frame. Sinks must not
//! block: the call sits on the byte-processing path.

/// Destination for encoded frames.
pub trait ByteSink {
    /// Error type for this sink.
    type Error: core::fmt::Debug;

    /// Queue a complete frame for transmission.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error>;
}

impl<S: ByteSink + ?Sized> ByteSink for &mut S {
    type Error = S::Error;

    fn transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        (**self).transmit(frame)
    }
}

/// A sink that discards every frame.
/// Useful for receive-only channels.
pub struct NullSink;

impl ByteSink for NullSink {
    type Error = ();

    fn transmit(&mut self, _frame: &[u8]) -> Result<(), ()> {
        Ok(())
    }
}

/// Sink that has run out of room in a fixed-capacity queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// Fixed-capacity byte queue: frames are appended back to back.
/// Rejects (without partial writes) a frame that does not fit.
impl<const N: usize> ByteSink for heapless::Vec<u8, N> {
    type Error = QueueFull;

    fn transmit(&mut self, frame: &[u8]) -> Result<(), QueueFull> {
        self.extend_from_slice(frame).map_err(|()| QueueFull)
    }
}

/// Records every frame; unit-test helper.
#[cfg(test)]
pub struct RecordingSink {
    frames: Vec<Vec<u8>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub fn last(&self) -> Option<&[u8]> {
        self.frames.last().map(Vec::as_slice)
    }
}

#[cfg(test)]
impl ByteSink for RecordingSink {
    type Error = core::convert::Infallible;

    fn transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        self.frames.push(frame.to_vec());
        Ok(())
    }
}
