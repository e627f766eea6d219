//! In-memory transport pair for tests.
//!
//! [`loopback_pair`] returns two connected endpoints: bytes written to one
//! side become readable on the other. Test knobs allow forcing write
//! failures and readiness so error paths can be exercised.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::TransportError;
use crate::traits::Transport;

#[derive(Debug, Default)]
struct Shared {
    a_to_b: VecDeque<u8>,
    b_to_a: VecDeque<u8>,
    a_ready: bool,
    b_ready: bool,
    fail_writes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

/// One endpoint of an in-memory byte pipe.
pub struct LoopbackTransport {
    shared: Arc<Mutex<Shared>>,
    side: Side,
}

/// Create a connected pair of loopback endpoints.
pub fn loopback_pair() -> (LoopbackTransport, LoopbackTransport) {
    let shared = Arc::new(Mutex::new(Shared {
        a_ready: true,
        b_ready: true,
        ..Default::default()
    }));
    (
        LoopbackTransport {
            shared: Arc::clone(&shared),
            side: Side::A,
        },
        LoopbackTransport {
            shared,
            side: Side::B,
        },
    )
}

impl LoopbackTransport {
    /// Force subsequent `write_all` calls on either side to fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Control this endpoint's `ready()` report.
    pub fn set_ready(&self, ready: bool) {
        let mut shared = self.lock();
        match self.side {
            Side::A => shared.a_ready = ready,
            Side::B => shared.b_ready = ready,
        }
    }

    /// Control the peer endpoint's `ready()` report (the peer may have been
    /// moved into an engine by the time a test needs to flip it).
    pub fn set_peer_ready(&self, ready: bool) {
        let mut shared = self.lock();
        match self.side {
            Side::A => shared.b_ready = ready,
            Side::B => shared.a_ready = ready,
        }
    }

    /// Bytes queued for this endpoint to read.
    pub fn pending(&self) -> usize {
        let shared = self.lock();
        match self.side {
            Side::A => shared.b_to_a.len(),
            Side::B => shared.a_to_b.len(),
        }
    }

    /// Drain and return everything this endpoint would read.
    pub fn drain(&mut self) -> Vec<u8> {
        let mut shared = self.lock();
        let queue = match self.side {
            Side::A => &mut shared.b_to_a,
            Side::B => &mut shared.a_to_b,
        };
        queue.drain(..).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Transport for LoopbackTransport {
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut shared = self.lock();
        let queue = match self.side {
            Side::A => &mut shared.b_to_a,
            Side::B => &mut shared.a_to_b,
        };
        let take = usize::min(buf.len(), queue.len());
        for slot in buf.iter_mut().take(take) {
            *slot = queue.pop_front().unwrap_or_default();
        }
        Ok(take)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let mut shared = self.lock();
        if shared.fail_writes {
            return Err(TransportError::Closed);
        }
        let queue = match self.side {
            Side::A => &mut shared.a_to_b,
            Side::B => &mut shared.b_to_a,
        };
        queue.extend(buf.iter().copied());
        Ok(())
    }

    fn ready(&self) -> bool {
        let shared = self.lock();
        match self.side {
            Side::A => shared.a_ready,
            Side::B => shared.b_ready,
        }
    }
}
