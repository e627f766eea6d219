//! Payload fragmentation and reassembly.
//!
//! Payloads larger than the negotiated `max_payload` are split into chunks;
//! every chunk but the last carries the FRAGMENT flag. The receiving side
//! concatenates fragment payloads keyed by (channel, opcode) until a frame
//! with FRAGMENT clear completes the payload. Exactly one reassembly is in
//! flight per direction.

use crate::error::ProtocolError;

/// Default reassembly capacity: two full frame buffers.
pub const DEFAULT_REASSEMBLY_CAPACITY: usize = 8192;

/// One outbound chunk of a fragmented payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub data: &'a [u8],
    /// True on every chunk except the last (maps to the FRAGMENT flag).
    pub more: bool,
}

/// Split `payload` into chunks of at most `max_payload` bytes.
///
/// An empty payload yields a single empty, final fragment.
pub fn fragments(payload: &[u8], max_payload: usize) -> impl Iterator<Item = Fragment<'_>> {
    assert!(max_payload > 0, "max_payload must be nonzero");
    let count = payload.len().div_ceil(max_payload).max(1);
    (0..count).map(move |i| {
        let start = i * max_payload;
        let end = usize::min(start + max_payload, payload.len());
        Fragment {
            data: &payload[start..end],
            more: i + 1 < count,
        }
    })
}

/// Inbound fragment accumulator.
#[derive(Debug)]
pub struct Reassembler {
    buf: Vec<u8>,
    capacity: usize,
    /// (channel, opcode) of the in-progress reassembly.
    key: Option<(u8, u8)>,
}

impl Reassembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity,
            key: None,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.key.is_some()
    }

    pub fn key(&self) -> Option<(u8, u8)> {
        self.key
    }

    /// Discard any partial reassembly.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.key = None;
    }

    /// Feed one received frame's payload.
    ///
    /// Returns `Ok(Some(payload))` when a final fragment completes the
    /// message, `Ok(None)` while more fragments are expected. A key mismatch
    /// or capacity overflow discards the buffer and returns the error.
    pub fn push(
        &mut self,
        channel: u8,
        opcode: u8,
        payload: &[u8],
        more: bool,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        if let Some((in_channel, in_opcode)) = self.key {
            if (in_channel, in_opcode) != (channel, opcode) {
                self.reset();
                return Err(ProtocolError::FragmentMismatch {
                    in_channel,
                    in_opcode,
                    channel,
                    opcode,
                });
            }
        }
        if self.buf.len() + payload.len() > self.capacity {
            let len = self.buf.len() + payload.len();
            self.reset();
            return Err(ProtocolError::ReassemblyOverflow {
                len,
                capacity: self.capacity,
            });
        }
        self.buf.extend_from_slice(payload);
        if more {
            self.key = Some((channel, opcode));
            tracing::trace!(
                channel,
                opcode,
                assembled = self.buf.len(),
                "reassembly: fragment appended"
            );
            Ok(None)
        } else {
            self.key = None;
            Ok(Some(std::mem::take(&mut self.buf)))
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_REASSEMBLY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_counts() {
        // Emitted frame count is ceil(len / max_payload)
        for (len, max, expected) in [
            (0usize, 256usize, 1usize),
            (1, 256, 1),
            (256, 256, 1),
            (257, 256, 2),
            (512, 256, 2),
            (5000, 4082, 2),
            (16384, 256, 64),
        ] {
            let payload = vec![0u8; len];
            let count = fragments(&payload, max).count();
            assert_eq!(count, expected, "len={len} max={max}");
        }
    }

    #[test]
    fn fragment_flags_and_sizes() {
        let payload: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        let parts: Vec<_> = fragments(&payload, 256).collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].more && parts[1].more && !parts[2].more);
        assert_eq!(parts[0].data.len(), 256);
        assert_eq!(parts[1].data.len(), 256);
        assert_eq!(parts[2].data.len(), 88);
        let rejoined: Vec<u8> = parts.iter().flat_map(|f| f.data.iter().copied()).collect();
        assert_eq!(rejoined, payload);
    }

    #[test]
    fn empty_payload_single_final_fragment() {
        let parts: Vec<_> = fragments(&[], 256).collect();
        assert_eq!(parts.len(), 1);
        assert!(!parts[0].more);
        assert!(parts[0].data.is_empty());
    }

    #[test]
    fn reassembly_roundtrip() {
        let payload: Vec<u8> = (0..5000).map(|i| (i % 255) as u8).collect();
        let mut reasm = Reassembler::new(8192);
        let mut result = None;
        for frag in fragments(&payload, 4082) {
            result = reasm.push(2, 0x26, frag.data, frag.more).unwrap();
        }
        assert_eq!(result.unwrap(), payload);
        assert!(!reasm.in_progress());
    }

    #[test]
    fn roundtrip_sweep() {
        // Fragmentation round-trip across the interesting length boundaries
        let max = 256;
        for len in [1usize, 255, 256, 257, 511, 512, 513, 4096, 16384] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 241) as u8).collect();
            let parts: Vec<_> = fragments(&payload, max).collect();
            assert_eq!(parts.len(), len.div_ceil(max).max(1));
            let mut reasm = Reassembler::new(32768);
            let mut result = None;
            for frag in &parts {
                result = reasm.push(0, 0x26, frag.data, frag.more).unwrap();
            }
            assert_eq!(result.unwrap(), payload, "len={len}");
        }
    }

    #[test]
    fn key_mismatch_discards_buffer() {
        let mut reasm = Reassembler::new(1024);
        assert!(reasm.push(2, 0x26, &[1, 2], true).unwrap().is_none());
        let err = reasm.push(3, 0x26, &[3, 4], true).unwrap_err();
        assert!(matches!(err, ProtocolError::FragmentMismatch { .. }));
        assert!(!reasm.in_progress());
        // A fresh reassembly works after the discard
        assert_eq!(reasm.push(3, 0x26, &[9], false).unwrap().unwrap(), vec![9]);
    }

    #[test]
    fn overflow_discards_buffer() {
        let mut reasm = Reassembler::new(8);
        assert!(reasm.push(1, 0x26, &[0; 6], true).unwrap().is_none());
        let err = reasm.push(1, 0x26, &[0; 6], true).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ReassemblyOverflow { len: 12, capacity: 8 }
        ));
        assert!(!reasm.in_progress());
    }

    #[test]
    fn unfragmented_passthrough() {
        let mut reasm = Reassembler::new(1024);
        let out = reasm.push(5, 0x27, &[1, 2, 3], false).unwrap();
        assert_eq!(out.unwrap(), vec![1, 2, 3]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn fragment_reassemble_roundtrip(
            payload in proptest::collection::vec(any::<u8>(), 0..8192),
            max_payload in 50..4082usize,
        ) {
            let parts: Vec<_> = fragments(&payload, max_payload).collect();
            // All but the last marked as continued
            for (i, frag) in parts.iter().enumerate() {
                prop_assert_eq!(frag.more, i + 1 < parts.len());
            }
            let mut reasm = Reassembler::new(payload.len().max(1));
            let mut result = None;
            for frag in &parts {
                result = reasm.push(0, 0, frag.data, frag.more).unwrap();
            }
            prop_assert_eq!(result.unwrap(), payload);
        }
    }
}
