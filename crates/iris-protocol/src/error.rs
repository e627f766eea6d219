//! Protocol-layer error types.
//!
//! These cover the failure classes above the wire codec: sequencing,
//! fragmentation, and retransmission. Framing errors come from
//! `iris_core::FrameError` and are wrapped here where they propagate.

use iris_core::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u8, actual: u8 },

    #[error(
        "fragment key mismatch: reassembling ({in_channel}, {in_opcode:#04x}) \
         but received ({channel}, {opcode:#04x})"
    )]
    FragmentMismatch {
        in_channel: u8,
        in_opcode: u8,
        channel: u8,
        opcode: u8,
    },

    #[error("reassembly overflow: {len} bytes exceeds buffer capacity {capacity}")]
    ReassemblyOverflow { len: usize, capacity: usize },

    #[error("retransmission queue full (depth {depth})")]
    RtxQueueFull { depth: usize },

    #[error("retries exhausted for seq {seq}")]
    RtxExhausted { seq: u8 },

    #[error("capability record too short: {actual} bytes (expected {expected})")]
    CapsTooShort { expected: usize, actual: usize },
}
