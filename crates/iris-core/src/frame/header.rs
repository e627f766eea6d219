//! The 10-byte frame header codec.
//!
//! Wire layout (all multi-byte integers little-endian):
//! ```text
//! [0..2]  SYNC    0xD5 0xAA
//! [2]     SEQ     sender sequence number
//! [3]     CHAN    channel id (0-31)
//! [4]     FLAGS   see frame::flags
//! [5]     OPCODE
//! [6..8]  LENGTH  payload byte count; 0 means no payload and no data CRC
//! [8..10] CRC     CRC-16 over bytes 0..8
//! ```

use crate::constants::{
    HEADER_CRC_RANGE, HEADER_SIZE, MAX_PAYLOAD, SYNC_BYTE_0, SYNC_BYTE_1,
};
use crate::crc::crc16;
use crate::error::FrameError;
use crate::frame::flags::FrameFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Header {
    pub seq: u8,
    pub channel: u8,
    pub flags: FrameFlags,
    pub opcode: u8,
    pub length: u16,
}

impl Header {
    /// Serialize to the 10-byte wire form, computing the header CRC.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = SYNC_BYTE_0;
        bytes[1] = SYNC_BYTE_1;
        bytes[2] = self.seq;
        bytes[3] = self.channel;
        bytes[4] = self.flags.to_byte();
        bytes[5] = self.opcode;
        bytes[6..8].copy_from_slice(&self.length.to_le_bytes());
        let crc = crc16(&bytes[..HEADER_CRC_RANGE]);
        bytes[8..10].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Parse a 10-byte header.
    ///
    /// `check_crc` controls header CRC validation (the CRC capability can be
    /// negotiated off); sync word, reserved flag bits, and the payload
    /// length bound are always validated.
    #[must_use = "parsing may fail; check the Result"]
    pub fn decode(bytes: &[u8], check_crc: bool) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                min: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0] != SYNC_BYTE_0 || bytes[1] != SYNC_BYTE_1 {
            return Err(FrameError::InvalidSync {
                found: [bytes[0], bytes[1]],
            });
        }
        if check_crc {
            let expected = crc16(&bytes[..HEADER_CRC_RANGE]);
            let actual = u16::from_le_bytes([bytes[8], bytes[9]]);
            if expected != actual {
                return Err(FrameError::HeaderChecksum { expected, actual });
            }
        }
        let flags = FrameFlags::from_byte(bytes[4])?;
        let length = u16::from_le_bytes([bytes[6], bytes[7]]);
        if length as usize > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLong {
                len: length as usize,
                max: MAX_PAYLOAD,
            });
        }
        Ok(Header {
            seq: bytes[2],
            channel: bytes[3],
            flags,
            opcode: bytes[5],
            length,
        })
    }
}
