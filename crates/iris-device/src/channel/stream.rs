//! Byte-stream channel backed by a bounded ring.
//!
//! Used for console-style endpoints: the device side appends output with
//! [`StreamChannel::push`], the host drains it with CHANNEL_READ. Writes
//! from the host land in the same buffer and can be consumed with
//! [`StreamChannel::take`]. Offsets are meaningless for a stream and are
//! ignored.

use std::collections::VecDeque;

use iris_core::Status;

use crate::channel::{Channel, Shape};

pub const DEFAULT_STREAM_CAPACITY: usize = 4096;

pub struct StreamChannel {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl StreamChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Device-side producer: append bytes for the host to read.
    /// Returns how many bytes fit.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let accept = data.len().min(self.capacity - self.buf.len());
        self.buf.extend(&data[..accept]);
        accept
    }

    /// Device-side consumer: drain everything the host has written.
    pub fn take(&mut self) -> Vec<u8> {
        self.buf.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for StreamChannel {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_CAPACITY)
    }
}

impl Channel for StreamChannel {
    fn read(&mut self, _offset: u32, out: &mut [u8]) -> Result<usize, Status> {
        if self.buf.is_empty() {
            // Nothing buffered yet; the host retries on BUSY
            return Err(Status::Busy);
        }
        let take = out.len().min(self.buf.len());
        for slot in out.iter_mut().take(take) {
            *slot = self.buf.pop_front().unwrap_or_default();
        }
        Ok(take)
    }

    fn write(&mut self, _offset: u32, data: &[u8]) -> Result<(), Status> {
        if data.len() > self.capacity - self.buf.len() {
            return Err(Status::Overflow);
        }
        self.buf.extend(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Status> {
        self.buf.clear();
        Ok(())
    }

    fn available(&self) -> u32 {
        self.buf.len() as u32
    }

    fn shape(&self) -> Result<Shape, Status> {
        Ok(Shape::new(&[self.buf.len() as u32]))
    }
}
