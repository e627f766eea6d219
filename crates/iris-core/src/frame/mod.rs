//! Frame types: header codec, flags, opcodes, and whole-frame helpers.

pub mod flags;
pub mod header;
pub mod opcode;

pub use flags::FrameFlags;
pub use header::Header;
pub use opcode::{Opcode, OpcodeKind};

use crate::constants::{DATA_CRC_SIZE, HEADER_SIZE};
use crate::crc::Crc32;
use crate::error::FrameError;

/// A complete decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialize header, payload, and (when present) the payload CRC into
    /// one contiguous buffer. The device transmit path writes these pieces
    /// separately; this helper exists for tests and host-side callers.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(&self.header, &self.payload)
    }

    /// Decode a complete frame from one contiguous buffer.
    ///
    /// Expects exactly one frame: header, `length` payload bytes, and a
    /// 4-byte payload CRC when `length > 0`.
    pub fn decode(bytes: &[u8], check_crc: bool) -> Result<Self, FrameError> {
        let header = Header::decode(bytes, check_crc)?;
        if header.length == 0 {
            return Ok(Frame {
                header,
                payload: Vec::new(),
            });
        }
        let need = HEADER_SIZE + header.length as usize + DATA_CRC_SIZE;
        if bytes.len() < need {
            return Err(FrameError::TooShort {
                min: need,
                actual: bytes.len(),
            });
        }
        let payload = &bytes[HEADER_SIZE..HEADER_SIZE + header.length as usize];
        if check_crc {
            let expected = crate::crc::crc32(payload);
            let at = HEADER_SIZE + header.length as usize;
            let actual = u32::from_le_bytes([
                bytes[at],
                bytes[at + 1],
                bytes[at + 2],
                bytes[at + 3],
            ]);
            if expected != actual {
                return Err(FrameError::PayloadChecksum { expected, actual });
            }
        }
        Ok(Frame {
            header,
            payload: payload.to_vec(),
        })
    }

    /// Total encoded size of this frame.
    pub fn wire_len(&self) -> usize {
        frame_wire_len(self.header.length)
    }
}

/// Encoded size of a frame with the given payload length.
pub fn frame_wire_len(payload_len: u16) -> usize {
    if payload_len == 0 {
        HEADER_SIZE
    } else {
        HEADER_SIZE + payload_len as usize + DATA_CRC_SIZE
    }
}

/// Serialize a frame into one contiguous buffer.
pub fn encode_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    debug_assert_eq!(header.length as usize, payload.len());
    let mut bytes = Vec::with_capacity(frame_wire_len(header.length));
    bytes.extend_from_slice(&header.encode());
    if !payload.is_empty() {
        bytes.extend_from_slice(payload);
        let mut crc = Crc32::new();
        crc.update(payload);
        bytes.extend_from_slice(&crc.finish().to_le_bytes());
    }
    bytes
}
