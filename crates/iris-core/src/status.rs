//! Protocol status codes.
//!
//! Every acknowledged command resolves to one of these codes. On the wire a
//! status travels as a 2-byte little-endian payload.

use crate::error::FrameError;

/// Size of a status payload on the wire.
pub const STATUS_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0,
    Failed = 1,
    Invalid = 2,
    Timeout = 3,
    Busy = 4,
    Checksum = 5,
    Sequence = 6,
    Overflow = 7,
    Fragment = 8,
    Unknown = 9,
}

impl Status {
    pub fn from_u16(v: u16) -> Result<Self, FrameError> {
        match v {
            0 => Ok(Status::Success),
            1 => Ok(Status::Failed),
            2 => Ok(Status::Invalid),
            3 => Ok(Status::Timeout),
            4 => Ok(Status::Busy),
            5 => Ok(Status::Checksum),
            6 => Ok(Status::Sequence),
            7 => Ok(Status::Overflow),
            8 => Ok(Status::Fragment),
            9 => Ok(Status::Unknown),
            other => Err(FrameError::UnknownStatus(other)),
        }
    }

    /// Encode as the 2-byte little-endian wire payload.
    pub fn to_wire(self) -> [u8; STATUS_SIZE] {
        (self as u16).to_le_bytes()
    }

    /// Decode from a 2-byte status payload.
    pub fn from_wire(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < STATUS_SIZE {
            return Err(FrameError::TooShort {
                min: STATUS_SIZE,
                actual: payload.len(),
            });
        }
        Self::from_u16(u16::from_le_bytes([payload[0], payload[1]]))
    }
}
