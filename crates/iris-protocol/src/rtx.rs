//! Retransmission queue.
//!
//! Every sent frame carrying ACK_REQ is parked here until the peer
//! acknowledges it. Unacknowledged entries are re-sent with the RTX flag on
//! an exponentially doubling timer; after the retry budget is spent the
//! entry is dropped and the failure surfaces to the originator.

use std::time::{Duration, Instant};

use iris_core::frame::FrameFlags;

use crate::error::ProtocolError;

/// Default initial retransmission timeout.
pub const DEFAULT_RTX_TIMEOUT: Duration = Duration::from_millis(500);
/// Default retry budget: one original send plus three retransmissions.
pub const DEFAULT_MAX_RETRIES: u8 = 3;
/// Hard bound on pending unacknowledged frames.
pub const DEFAULT_RTX_DEPTH: usize = 8;

#[derive(Debug, Clone)]
struct Entry {
    seq: u8,
    channel: u8,
    opcode: u8,
    flags: FrameFlags,
    payload: Vec<u8>,
    deadline: Instant,
    timeout: Duration,
    retries_remaining: u8,
}

/// A decision produced by [`RtxQueue::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtxAction {
    /// Re-send this frame. `flags` already has RTX set.
    Resend {
        seq: u8,
        channel: u8,
        opcode: u8,
        flags: FrameFlags,
        payload: Vec<u8>,
    },
    /// Retries exhausted; the frame is lost.
    Expired { seq: u8 },
}

pub struct RtxQueue {
    entries: Vec<Entry>,
    depth: usize,
    initial_timeout: Duration,
    max_retries: u8,
    high_water: usize,
}

impl RtxQueue {
    pub fn new(depth: usize, initial_timeout: Duration, max_retries: u8) -> Self {
        Self {
            entries: Vec::with_capacity(depth),
            depth,
            initial_timeout,
            max_retries,
            high_water: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest occupancy seen since creation.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Whether another entry can be parked without hitting the depth bound.
    pub fn has_headroom(&self) -> bool {
        self.entries.len() < self.depth
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.initial_timeout = timeout;
    }

    pub fn set_max_retries(&mut self, retries: u8) {
        self.max_retries = retries;
    }

    /// Park a frame awaiting acknowledgment.
    pub fn push(
        &mut self,
        seq: u8,
        channel: u8,
        opcode: u8,
        flags: FrameFlags,
        payload: Vec<u8>,
        now: Instant,
    ) -> Result<(), ProtocolError> {
        if !self.has_headroom() {
            return Err(ProtocolError::RtxQueueFull { depth: self.depth });
        }
        self.entries.push(Entry {
            seq,
            channel,
            opcode,
            flags,
            payload,
            deadline: now + self.initial_timeout,
            timeout: self.initial_timeout,
            retries_remaining: self.max_retries,
        });
        self.high_water = self.high_water.max(self.entries.len());
        Ok(())
    }

    /// Acknowledge a pending frame.
    ///
    /// Matches the exact sequence number first; failing that, the oldest
    /// entry with the acknowledging frame's (channel, opcode), since
    /// responses carry the responder's own sequence number.
    pub fn acknowledge(&mut self, seq: u8, channel: u8, opcode: u8) -> bool {
        if let Some(at) = self.entries.iter().position(|e| e.seq == seq) {
            tracing::trace!(seq, "rtx: acknowledged");
            self.entries.remove(at);
            return true;
        }
        if let Some(at) = self
            .entries
            .iter()
            .position(|e| e.channel == channel && e.opcode == opcode)
        {
            let seq = self.entries[at].seq;
            tracing::trace!(seq, channel, opcode, "rtx: acknowledged by route");
            self.entries.remove(at);
            return true;
        }
        false
    }

    /// Collect due retransmissions and expirations.
    pub fn poll(&mut self, now: Instant) -> Vec<RtxAction> {
        let mut actions = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if now < self.entries[i].deadline {
                i += 1;
                continue;
            }
            if self.entries[i].retries_remaining == 0 {
                let entry = self.entries.remove(i);
                tracing::warn!(seq = entry.seq, "rtx: retries exhausted, dropping frame");
                actions.push(RtxAction::Expired { seq: entry.seq });
                continue;
            }
            let entry = &mut self.entries[i];
            entry.retries_remaining -= 1;
            entry.timeout *= 2;
            entry.deadline = now + entry.timeout;
            let mut flags = entry.flags;
            flags.rtx = true;
            tracing::debug!(
                seq = entry.seq,
                remaining = entry.retries_remaining,
                "rtx: retransmitting"
            );
            actions.push(RtxAction::Resend {
                seq: entry.seq,
                channel: entry.channel,
                opcode: entry.opcode,
                flags,
                payload: entry.payload.clone(),
            });
            i += 1;
        }
        actions
    }

    /// Drop all pending entries (PROTO_SYNC).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for RtxQueue {
    fn default() -> Self {
        Self::new(DEFAULT_RTX_DEPTH, DEFAULT_RTX_TIMEOUT, DEFAULT_MAX_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags_ack_req() -> FrameFlags {
        FrameFlags {
            ack_req: true,
            ..Default::default()
        }
    }

    fn push_one(queue: &mut RtxQueue, seq: u8, now: Instant) {
        queue
            .push(seq, 0, 0x26, flags_ack_req(), vec![seq], now)
            .unwrap();
    }

    #[test]
    fn ack_removes_entry() {
        let now = Instant::now();
        let mut queue = RtxQueue::default();
        push_one(&mut queue, 5, now);
        assert!(queue.acknowledge(5, 0, 0x26));
        assert!(queue.is_empty());
        assert!(!queue.acknowledge(5, 0, 0x26));
    }

    #[test]
    fn ack_by_route_when_seq_differs() {
        // The peer's response carries its own TX sequence, not ours
        let now = Instant::now();
        let mut queue = RtxQueue::default();
        push_one(&mut queue, 5, now);
        assert!(queue.acknowledge(200, 0, 0x26));
        assert!(queue.is_empty());
    }

    #[test]
    fn backoff_doubles_per_retry() {
        // 1 original + 3 retransmissions with 500/1000/2000 ms spacing
        let start = Instant::now();
        let mut queue = RtxQueue::default();
        push_one(&mut queue, 1, start);

        assert!(queue.poll(start + Duration::from_millis(499)).is_empty());

        let t1 = start + Duration::from_millis(500);
        let actions = queue.poll(t1);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            RtxAction::Resend { seq, flags, .. } => {
                assert_eq!(*seq, 1);
                assert!(flags.rtx, "retries carry the RTX flag");
            }
            other => panic!("expected resend, got {other:?}"),
        }

        // Next deadline is 1000 ms after the first retry
        assert!(queue.poll(t1 + Duration::from_millis(999)).is_empty());
        let t2 = t1 + Duration::from_millis(1000);
        assert_eq!(queue.poll(t2).len(), 1);

        // Then 2000 ms
        assert!(queue.poll(t2 + Duration::from_millis(1999)).is_empty());
        let t3 = t2 + Duration::from_millis(2000);
        let actions = queue.poll(t3);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], RtxAction::Resend { .. }));

        // Budget spent: the next due poll expires the entry
        let t4 = t3 + Duration::from_millis(4000);
        let actions = queue.poll(t4);
        assert_eq!(actions, vec![RtxAction::Expired { seq: 1 }]);
        assert!(queue.is_empty());
    }

    #[test]
    fn exactly_three_retries_total() {
        let start = Instant::now();
        let mut queue = RtxQueue::default();
        push_one(&mut queue, 9, start);
        let mut resends = 0;
        let mut expired = 0;
        let mut now = start;
        for _ in 0..16 {
            now += Duration::from_secs(10);
            for action in queue.poll(now) {
                match action {
                    RtxAction::Resend { .. } => resends += 1,
                    RtxAction::Expired { .. } => expired += 1,
                }
            }
        }
        assert_eq!(resends, 3);
        assert_eq!(expired, 1);
    }

    #[test]
    fn ack_after_retry_stops_retransmission() {
        let start = Instant::now();
        let mut queue = RtxQueue::default();
        push_one(&mut queue, 2, start);
        assert_eq!(queue.poll(start + Duration::from_millis(500)).len(), 1);
        assert!(queue.acknowledge(2, 0, 0x26));
        assert!(queue.poll(start + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn depth_bound_rejects_push() {
        let now = Instant::now();
        let mut queue = RtxQueue::new(2, DEFAULT_RTX_TIMEOUT, 3);
        push_one(&mut queue, 0, now);
        push_one(&mut queue, 1, now);
        let err = queue
            .push(2, 0, 0x26, flags_ack_req(), vec![], now)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::RtxQueueFull { depth: 2 }));
    }

    #[test]
    fn high_water_tracks_peak() {
        let now = Instant::now();
        let mut queue = RtxQueue::default();
        push_one(&mut queue, 0, now);
        push_one(&mut queue, 1, now);
        push_one(&mut queue, 2, now);
        queue.acknowledge(0, 0, 0x26);
        queue.acknowledge(1, 0, 0x26);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.high_water(), 3);
    }

    #[test]
    fn clear_drops_everything() {
        let now = Instant::now();
        let mut queue = RtxQueue::default();
        push_one(&mut queue, 0, now);
        push_one(&mut queue, 1, now);
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.poll(now + Duration::from_secs(60)).is_empty());
    }
}
