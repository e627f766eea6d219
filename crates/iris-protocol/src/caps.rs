//! Capability negotiation record.
//!
//! PROTO_GET_CAPS and PROTO_SET_CAPS exchange a 16-byte record:
//! ```text
//! [0]      flags: bit0 CRC, bit1 SEQ, bit2 ACK, bit3 EVENTS
//! [1]      max_retries
//! [2..4]   max_payload (LE)
//! [4..6]   frame_timeout_ms (LE)
//! [6..8]   rtx_timeout_ms (LE)
//! [8..16]  reserved, zero
//! ```
//! SET clamps `max_payload` to the [50, 4082] bound and echoes the values
//! it actually accepted.

use iris_core::constants::{MAX_PAYLOAD, MIN_PAYLOAD};

use crate::error::ProtocolError;

/// Size of the capability record on the wire.
pub const CAPS_RECORD_SIZE: usize = 16;

const CAP_CRC: u8 = 1 << 0;
const CAP_SEQ: u8 = 1 << 1;
const CAP_ACK: u8 = 1 << 2;
const CAP_EVENTS: u8 = 1 << 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub crc: bool,
    pub seq: bool,
    pub ack: bool,
    pub events: bool,
    pub max_retries: u8,
    pub max_payload: u16,
    pub frame_timeout_ms: u16,
    pub rtx_timeout_ms: u16,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            crc: true,
            seq: true,
            ack: true,
            events: true,
            max_retries: 3,
            max_payload: MAX_PAYLOAD as u16,
            frame_timeout_ms: 500,
            rtx_timeout_ms: 500,
        }
    }
}

impl Capabilities {
    pub fn encode(&self) -> [u8; CAPS_RECORD_SIZE] {
        let mut bytes = [0u8; CAPS_RECORD_SIZE];
        bytes[0] = (self.crc as u8) * CAP_CRC
            | (self.seq as u8) * CAP_SEQ
            | (self.ack as u8) * CAP_ACK
            | (self.events as u8) * CAP_EVENTS;
        bytes[1] = self.max_retries;
        bytes[2..4].copy_from_slice(&self.max_payload.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.frame_timeout_ms.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.rtx_timeout_ms.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < CAPS_RECORD_SIZE {
            return Err(ProtocolError::CapsTooShort {
                expected: CAPS_RECORD_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            crc: bytes[0] & CAP_CRC != 0,
            seq: bytes[0] & CAP_SEQ != 0,
            ack: bytes[0] & CAP_ACK != 0,
            events: bytes[0] & CAP_EVENTS != 0,
            max_retries: bytes[1],
            max_payload: u16::from_le_bytes([bytes[2], bytes[3]]),
            frame_timeout_ms: u16::from_le_bytes([bytes[4], bytes[5]]),
            rtx_timeout_ms: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }

    /// Clamp requested values to what the device can actually honor.
    pub fn clamped(mut self) -> Self {
        self.max_payload = self
            .max_payload
            .clamp(MIN_PAYLOAD as u16, MAX_PAYLOAD as u16);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let caps = Capabilities::default();
        assert!(caps.crc && caps.seq && caps.ack && caps.events);
        assert_eq!(caps.max_payload, 4082);
        assert_eq!(caps.max_retries, 3);
        assert_eq!(caps.frame_timeout_ms, 500);
        assert_eq!(caps.rtx_timeout_ms, 500);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let caps = Capabilities {
            crc: true,
            seq: false,
            ack: true,
            events: false,
            max_retries: 5,
            max_payload: 1024,
            frame_timeout_ms: 250,
            rtx_timeout_ms: 750,
        };
        let bytes = caps.encode();
        assert_eq!(bytes.len(), CAPS_RECORD_SIZE);
        assert_eq!(Capabilities::decode(&bytes).unwrap(), caps);
    }

    #[test]
    fn flag_bits() {
        let bytes = Capabilities::default().encode();
        assert_eq!(bytes[0], 0x0F);
        // Reserved tail encodes as zero
        assert_eq!(&bytes[8..], &[0u8; 8]);
    }

    #[test]
    fn clamp_bounds_max_payload() {
        let low = Capabilities {
            max_payload: 10,
            ..Default::default()
        };
        assert_eq!(low.clamped().max_payload, 50);

        let high = Capabilities {
            max_payload: 0xFFFF,
            ..Default::default()
        };
        assert_eq!(high.clamped().max_payload, 4082);

        let ok = Capabilities {
            max_payload: 256,
            ..Default::default()
        };
        assert_eq!(ok.clamped().max_payload, 256);
    }

    #[test]
    fn short_record_rejected() {
        assert!(Capabilities::decode(&[0u8; 15]).is_err());
    }
}
