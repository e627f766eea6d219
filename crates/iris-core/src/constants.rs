//! Protocol constants for the Iris wire format.

/// First byte of the frame synchronization word, transmitted first.
pub const SYNC_BYTE_0: u8 = 0xD5;
/// Second byte of the frame synchronization word.
pub const SYNC_BYTE_1: u8 = 0xAA;

/// Fixed frame header size in bytes: sync(2) + seq(1) + chan(1) + flags(1)
/// + opcode(1) + length(2) + header CRC(2).
pub const HEADER_SIZE: usize = 10;
/// The header CRC covers bytes 0..8 (it never covers itself).
pub const HEADER_CRC_RANGE: usize = 8;
/// Size of the CRC-32 trailer present whenever LENGTH > 0.
pub const DATA_CRC_SIZE: usize = 4;

/// Total frame buffer size on the device.
pub const MAX_FRAME: usize = 4096;
/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD: usize = MAX_FRAME - HEADER_SIZE - DATA_CRC_SIZE;
/// Smallest negotiable `max_payload` value.
pub const MIN_PAYLOAD: usize = 50;

/// Channel identifiers are 5 bits wide.
pub const MAX_CHANNELS: usize = 32;
/// Channel 0 is reserved for the protocol/transport response route.
pub const CONTROL_CHANNEL: u8 = 0;

/// Protocol version reported in the SYS_INFO record.
pub const PROTOCOL_VERSION: [u8; 3] = [1, 0, 0];
