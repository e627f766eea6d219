//! Bounded byte ring buffer.
//!
//! Receive bytes arrive from an interrupt-like context (on this port, the
//! OS thread blocked on the socket) and are drained by the engine's core
//! loop. [`SharedByteRing`] is the two-thread wrapper; the producer sees
//! short writes when the consumer falls behind, never blocking.

use std::sync::{Arc, Mutex};

/// Default ring capacity: two full frame buffers.
pub const DEFAULT_RING_CAPACITY: usize = 8192;

/// Fixed-capacity single-producer single-consumer byte ring.
#[derive(Debug)]
pub struct ByteRing {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
}

impl ByteRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be nonzero");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Append as many bytes as fit, returning how many were accepted.
    pub fn push_slice(&mut self, data: &[u8]) -> usize {
        let accept = usize::min(data.len(), self.free());
        let cap = self.buf.len();
        let tail = (self.head + self.len) % cap;
        let first = usize::min(accept, cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        let rest = accept - first;
        if rest > 0 {
            self.buf[..rest].copy_from_slice(&data[first..accept]);
        }
        self.len += accept;
        accept
    }

    /// Pop up to `out.len()` bytes, returning how many were written.
    pub fn pop_slice(&mut self, out: &mut [u8]) -> usize {
        let take = usize::min(out.len(), self.len);
        let cap = self.buf.len();
        let first = usize::min(take, cap - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        let rest = take - first;
        if rest > 0 {
            out[first..take].copy_from_slice(&self.buf[..rest]);
        }
        self.head = (self.head + take) % cap;
        self.len -= take;
        take
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

/// A [`ByteRing`] shared between the receive producer and the core loop.
#[derive(Debug, Clone)]
pub struct SharedByteRing {
    inner: Arc<Mutex<ByteRing>>,
}

impl SharedByteRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ByteRing::new(capacity))),
        }
    }

    /// Producer side. Returns the number of bytes accepted; the remainder
    /// is the producer's to retry or drop.
    pub fn push_slice(&self, data: &[u8]) -> usize {
        let mut ring = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let accepted = ring.push_slice(data);
        if accepted < data.len() {
            tracing::trace!(
                refused = data.len() - accepted,
                "ring: consumer falling behind"
            );
        }
        accepted
    }

    /// Consumer side.
    pub fn pop_slice(&self, out: &mut [u8]) -> usize {
        let mut ring = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        ring.pop_slice(out)
    }

    pub fn len(&self) -> usize {
        let ring = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SharedByteRing {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_roundtrip() {
        let mut ring = ByteRing::new(16);
        assert_eq!(ring.push_slice(&[1, 2, 3, 4]), 4);
        let mut out = [0u8; 8];
        assert_eq!(ring.pop_slice(&mut out), 4);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        assert!(ring.is_empty());
    }

    #[test]
    fn wraparound() {
        let mut ring = ByteRing::new(8);
        let mut out = [0u8; 8];
        // Walk the head around the buffer several times
        for round in 0..10u8 {
            let data = [round, round + 1, round + 2, round + 3, round + 4];
            assert_eq!(ring.push_slice(&data), 5);
            assert_eq!(ring.pop_slice(&mut out[..5]), 5);
            assert_eq!(&out[..5], &data);
        }
    }

    #[test]
    fn full_ring_accepts_partial() {
        let mut ring = ByteRing::new(4);
        assert_eq!(ring.push_slice(&[1, 2, 3]), 3);
        assert_eq!(ring.push_slice(&[4, 5, 6]), 1);
        assert_eq!(ring.len(), 4);
        let mut out = [0u8; 4];
        assert_eq!(ring.pop_slice(&mut out), 4);
        assert_eq!(&out, &[1, 2, 3, 4]);
    }

    #[test]
    fn pop_from_empty() {
        let mut ring = ByteRing::new(4);
        let mut out = [0u8; 4];
        assert_eq!(ring.pop_slice(&mut out), 0);
    }

    #[test]
    fn partial_pop_preserves_order() {
        let mut ring = ByteRing::new(16);
        ring.push_slice(&[1, 2, 3, 4, 5, 6]);
        let mut out = [0u8; 2];
        assert_eq!(ring.pop_slice(&mut out), 2);
        assert_eq!(&out, &[1, 2]);
        assert_eq!(ring.pop_slice(&mut out), 2);
        assert_eq!(&out, &[3, 4]);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn shared_ring_across_threads() {
        let ring = SharedByteRing::new(1024);
        let producer = ring.clone();
        let handle = std::thread::spawn(move || {
            let mut sent = 0usize;
            let data: Vec<u8> = (0..=255).collect();
            while sent < data.len() {
                sent += producer.push_slice(&data[sent..]);
            }
        });
        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        while received.len() < 256 {
            let n = ring.pop_slice(&mut buf);
            received.extend_from_slice(&buf[..n]);
        }
        handle.join().unwrap();
        let expected: Vec<u8> = (0..=255).collect();
        assert_eq!(received, expected);
    }
}
