//! Protocol statistics counters.
//!
//! Eight monotonic `u32` counters, snapshotted as a 32-byte little-endian
//! record by PROTO_STATS. Counters never reset; `max_ack_queue_depth` is a
//! high-water mark fed from the retransmission queue.

/// Size of the statistics snapshot on the wire.
pub const STATS_RECORD_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub frames_sent: u32,
    pub frames_received: u32,
    pub checksum_errors: u32,
    pub sequence_errors: u32,
    pub fragment_errors: u32,
    pub transport_errors: u32,
    pub events_dropped: u32,
    pub max_ack_queue_depth: u32,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode the 32-byte snapshot.
    pub fn encode(&self) -> [u8; STATS_RECORD_SIZE] {
        let mut bytes = [0u8; STATS_RECORD_SIZE];
        for (i, counter) in [
            self.frames_sent,
            self.frames_received,
            self.checksum_errors,
            self.sequence_errors,
            self.fragment_errors,
            self.transport_errors,
            self.events_dropped,
            self.max_ack_queue_depth,
        ]
        .into_iter()
        .enumerate()
        {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&counter.to_le_bytes());
        }
        bytes
    }

    /// Record the current ACK queue occupancy, keeping the high-water mark.
    pub fn note_ack_depth(&mut self, depth: usize) {
        self.max_ack_queue_depth = self.max_ack_queue_depth.max(depth as u32);
    }
}
