//! Wire-format error types.

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid sync word: {found:02x?}")]
    InvalidSync { found: [u8; 2] },

    #[error("header too short: {actual} bytes (minimum {min})")]
    TooShort { min: usize, actual: usize },

    #[error("header checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    HeaderChecksum { expected: u16, actual: u16 },

    #[error("payload checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    PayloadChecksum { expected: u32, actual: u32 },

    #[error("reserved flag bits set: {0:#04x}")]
    ReservedFlags(u8),

    #[error("payload length {len} exceeds maximum {max}")]
    PayloadTooLong { len: usize, max: usize },

    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    #[error("unknown status code: {0:#06x}")]
    UnknownStatus(u16),
}
