//! Double-buffered frame writer.
//!
//! Two alternating byte buffers: one accepts newly queued frames while
//! the other drains to the OS across poll callbacks. A swap is only
//! accepted once the in-flight buffer has fully drained, which bounds
//! the system to one pending write plus one accumulating batch, the
//! only backpressure mechanism there is.

use crate::error::FlushError;
use crate::protocol::{self, VarKind};

#[derive(Debug, Default)]
pub struct WriteBuffer {
    bufs: [Vec<u8>; 2],
    /// Index of the buffer accepting newly queued frames.
    accumulating: usize,
    /// Bytes of the in-flight buffer already handed to the OS.
    done: usize,
    in_flight: bool,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pre-serialized blob (handshake + descriptors).
    pub fn queue_bytes(&mut self, bytes: &[u8]) {
        self.bufs[self.accumulating].extend_from_slice(bytes);
    }

    pub fn queue_num(&mut self, id: u32, value: f64) {
        protocol::encode_num(&mut self.bufs[self.accumulating], id, value);
    }

    pub fn queue_str(&mut self, id: u32, bytes: &[u8]) {
        protocol::encode_str(&mut self.bufs[self.accumulating], id, bytes);
    }

    pub fn queue_log(&mut self, level: u8, message: &[u8]) {
        protocol::encode_log(&mut self.bufs[self.accumulating], level, message);
    }

    pub fn queue_descriptor(&mut self, kind: VarKind, id: u32, divisor: u64, config: &[u8]) {
        protocol::encode_descriptor(&mut self.bufs[self.accumulating], kind, id, divisor, config);
    }

    pub fn queue_alive(&mut self) {
        protocol::encode_alive(&mut self.bufs[self.accumulating]);
    }

    /// Whether the previous flush has fully drained.
    pub fn ready(&self) -> bool {
        !self.in_flight
    }

    /// Swap buffers, making the accumulated batch the in-flight one.
    ///
    /// Rejected while a previous flush is still draining; callers defer
    /// to the next tick. Flushing an empty batch is a no-op.
    pub fn flush(&mut self) -> Result<(), FlushError> {
        if self.in_flight {
            return Err(FlushError::Busy);
        }
        if self.bufs[self.accumulating].is_empty() {
            return Ok(());
        }
        self.accumulating ^= 1;
        self.bufs[self.accumulating].clear();
        self.done = 0;
        self.in_flight = true;
        Ok(())
    }

    /// Unwritten tail of the in-flight buffer.
    pub fn pending(&self) -> &[u8] {
        if self.in_flight {
            &self.bufs[self.accumulating ^ 1][self.done..]
        } else {
            &[]
        }
    }

    /// Record a partial OS write of `n` bytes.
    pub fn advance(&mut self, n: usize) {
        self.done += n;
        if self.done >= self.bufs[self.accumulating ^ 1].len() {
            self.in_flight = false;
        }
    }

    /// Drop everything (connection teardown).
    pub fn clear(&mut self) {
        self.bufs[0].clear();
        self.bufs[1].clear();
        self.done = 0;
        self.in_flight = false;
    }
}
