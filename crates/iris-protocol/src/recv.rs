//! Byte-stream receive state machine.
//!
//! Consumes opaque byte chunks from the transport and produces complete,
//! validated frames. The machine walks IDLE → SYNC → HEADER → DATA → CRC,
//! recovering from any framing error by scanning forward for the next sync
//! word. Time is passed in explicitly so timeouts are testable.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use iris_core::constants::{DATA_CRC_SIZE, HEADER_SIZE, SYNC_BYTE_0, SYNC_BYTE_1};
use iris_core::crc::crc32;
use iris_core::frame::Header;
use iris_core::FrameError;

/// Default per-frame receive timeout.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(500);

/// Observable machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Idle,
    Sync,
    Header,
    Data,
    Crc,
}

/// Outcome produced while consuming received bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxEvent {
    /// A complete frame passed all enabled validation.
    Frame { header: Header, payload: Vec<u8> },
    /// Header CRC failed; the post-sync header bytes were re-scanned.
    HeaderChecksum,
    /// Header CRC passed but the header is semantically invalid
    /// (reserved flag bits, out-of-bounds length).
    HeaderInvalid,
    /// Payload CRC failed. The header is known, so the caller can NAK.
    PayloadChecksum { header: Header },
    /// The per-frame timer expired mid-frame.
    Timeout,
}

enum State {
    Idle,
    Sync {
        prev_is_sync0: bool,
    },
    Header {
        buf: [u8; HEADER_SIZE],
        got: usize,
    },
    Data {
        header: Header,
        payload: Vec<u8>,
    },
    Crc {
        header: Header,
        payload: Vec<u8>,
        crc: [u8; DATA_CRC_SIZE],
        got: usize,
    },
}

pub struct RxMachine {
    state: State,
    check_crc: bool,
    frame_timeout: Duration,
    deadline: Option<Instant>,
    /// Bytes queued for re-scanning after a header CRC failure. Always
    /// drained before the next input byte is consumed.
    replay: VecDeque<u8>,
}

impl RxMachine {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            check_crc: true,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            deadline: None,
            replay: VecDeque::new(),
        }
    }

    pub fn state(&self) -> RxState {
        match self.state {
            State::Idle => RxState::Idle,
            State::Sync { .. } => RxState::Sync,
            State::Header { .. } => RxState::Header,
            State::Data { .. } => RxState::Data,
            State::Crc { .. } => RxState::Crc,
        }
    }

    /// Enable or disable CRC validation (negotiated via PROTO_SET_CAPS).
    /// The 4-byte payload CRC is still consumed from the wire either way.
    pub fn set_check_crc(&mut self, check: bool) {
        self.check_crc = check;
    }

    pub fn set_frame_timeout(&mut self, timeout: Duration) {
        self.frame_timeout = timeout;
    }

    /// Abandon any partial frame and return to IDLE.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.deadline = None;
        self.replay.clear();
    }

    /// Consume a chunk of received bytes, appending outcomes to `out`.
    pub fn push(&mut self, bytes: &[u8], now: Instant, out: &mut Vec<RxEvent>) {
        for &byte in bytes {
            self.step(byte, now, out);
            while let Some(replayed) = self.replay.pop_front() {
                self.step(replayed, now, out);
            }
        }
    }

    /// Check the per-frame timer. Returns `Some(Timeout)` if a partial frame
    /// has been abandoned.
    pub fn tick(&mut self, now: Instant) -> Option<RxEvent> {
        let mid_frame = matches!(
            self.state,
            State::Header { .. } | State::Data { .. } | State::Crc { .. }
        );
        match self.deadline {
            Some(deadline) if mid_frame && now >= deadline => {
                tracing::debug!("rx: frame timeout, resyncing");
                self.state = State::Idle;
                self.deadline = None;
                Some(RxEvent::Timeout)
            }
            _ => None,
        }
    }

    fn step(&mut self, byte: u8, now: Instant, out: &mut Vec<RxEvent>) {
        let state = std::mem::replace(&mut self.state, State::Idle);
        self.state = match state {
            State::Idle => State::Sync {
                prev_is_sync0: byte == SYNC_BYTE_0,
            },
            State::Sync { prev_is_sync0 } => {
                if prev_is_sync0 && byte == SYNC_BYTE_1 {
                    let mut buf = [0u8; HEADER_SIZE];
                    buf[0] = SYNC_BYTE_0;
                    buf[1] = SYNC_BYTE_1;
                    self.deadline = Some(now + self.frame_timeout);
                    State::Header { buf, got: 2 }
                } else {
                    State::Sync {
                        prev_is_sync0: byte == SYNC_BYTE_0,
                    }
                }
            }
            State::Header { mut buf, got } => {
                buf[got] = byte;
                if got + 1 == HEADER_SIZE {
                    self.finish_header(&buf, out)
                } else {
                    State::Header { buf, got: got + 1 }
                }
            }
            State::Data { header, mut payload } => {
                payload.push(byte);
                if payload.len() == header.length as usize {
                    State::Crc {
                        header,
                        payload,
                        crc: [0; DATA_CRC_SIZE],
                        got: 0,
                    }
                } else {
                    State::Data { header, payload }
                }
            }
            State::Crc {
                header,
                payload,
                mut crc,
                got,
            } => {
                crc[got] = byte;
                if got + 1 == DATA_CRC_SIZE {
                    self.deadline = None;
                    self.finish_payload(header, payload, crc, out);
                    State::Idle
                } else {
                    State::Crc {
                        header,
                        payload,
                        crc,
                        got: got + 1,
                    }
                }
            }
        };
    }

    fn finish_header(&mut self, buf: &[u8; HEADER_SIZE], out: &mut Vec<RxEvent>) -> State {
        match Header::decode(buf, self.check_crc) {
            Ok(header) if header.length == 0 => {
                self.deadline = None;
                tracing::trace!(
                    seq = header.seq,
                    channel = header.channel,
                    opcode = header.opcode,
                    "rx: frame (no payload)"
                );
                out.push(RxEvent::Frame {
                    header,
                    payload: Vec::new(),
                });
                State::Idle
            }
            Ok(header) => State::Data {
                payload: Vec::with_capacity(header.length as usize),
                header,
            },
            Err(FrameError::HeaderChecksum { expected, actual }) => {
                tracing::trace!(expected, actual, "rx: header checksum failed");
                self.deadline = None;
                // A genuine frame may start inside the 8 bytes consumed after
                // the false sync; run them back through the sync scanner.
                self.replay.extend(&buf[2..]);
                out.push(RxEvent::HeaderChecksum);
                State::Idle
            }
            Err(err) => {
                tracing::trace!(%err, "rx: invalid header");
                self.deadline = None;
                out.push(RxEvent::HeaderInvalid);
                State::Idle
            }
        }
    }

    fn finish_payload(
        &mut self,
        header: Header,
        payload: Vec<u8>,
        crc: [u8; DATA_CRC_SIZE],
        out: &mut Vec<RxEvent>,
    ) {
        if self.check_crc {
            let expected = crc32(&payload);
            let actual = u32::from_le_bytes(crc);
            if expected != actual {
                tracing::trace!(expected, actual, "rx: payload checksum failed");
                out.push(RxEvent::PayloadChecksum { header });
                return;
            }
        }
        tracing::trace!(
            seq = header.seq,
            channel = header.channel,
            opcode = header.opcode,
            len = payload.len(),
            "rx: frame"
        );
        out.push(RxEvent::Frame { header, payload });
    }
}

impl Default for RxMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_core::frame::{encode_frame, FrameFlags};

    fn header(opcode: u8, length: u16) -> Header {
        Header {
            seq: 0,
            channel: 0,
            flags: FrameFlags::default(),
            opcode,
            length,
        }
    }

    fn push_all(rx: &mut RxMachine, bytes: &[u8]) -> Vec<RxEvent> {
        let mut out = Vec::new();
        rx.push(bytes, Instant::now(), &mut out);
        out
    }

    #[test]
    fn whole_frame_single_chunk() {
        let frame = encode_frame(&header(0x26, 3), &[1, 2, 3]);
        let mut rx = RxMachine::new();
        let events = push_all(&mut rx, &frame);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], RxEvent::Frame { payload, .. } if payload == &[1, 2, 3]));
        assert_eq!(rx.state(), RxState::Idle);
    }

    #[test]
    fn empty_payload_frame_has_no_data_crc() {
        let frame = encode_frame(&header(0x00, 0), &[]);
        assert_eq!(frame.len(), HEADER_SIZE);
        let mut rx = RxMachine::new();
        let events = push_all(&mut rx, &frame);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], RxEvent::Frame { payload, .. } if payload.is_empty()));
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let frame = encode_frame(&header(0x26, 8), &[9; 8]);
        let mut rx = RxMachine::new();
        let mut events = Vec::new();
        for &b in &frame {
            rx.push(&[b], Instant::now(), &mut events);
        }
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn garbage_prefix_resync() {
        let frame = encode_frame(&header(0x26, 2), &[0xAB, 0xCD]);
        // Garbage that cannot contain the sync word
        let mut stream: Vec<u8> = (0..512).map(|i| (i % 0xA9) as u8).collect();
        stream.extend_from_slice(&frame);
        let mut rx = RxMachine::new();
        let events = push_all(&mut rx, &stream);
        assert_eq!(events.len(), 1, "exactly one frame despite garbage prefix");
        assert!(matches!(events[0], RxEvent::Frame { .. }));
    }

    #[test]
    fn split_sync_across_chunks() {
        let frame = encode_frame(&header(0x00, 0), &[]);
        let mut rx = RxMachine::new();
        let mut events = Vec::new();
        rx.push(&[0x00, 0xD5], Instant::now(), &mut events);
        rx.push(&frame[1..], Instant::now(), &mut events);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn header_checksum_failure_replays_for_resync() {
        // A false sync word directly followed by a real frame: the real
        // frame's first 8 bytes land in the false header and must survive.
        let frame = encode_frame(&header(0x26, 1), &[0x5A]);
        let mut stream = vec![SYNC_BYTE_0, SYNC_BYTE_1];
        stream.extend_from_slice(&frame);
        let mut rx = RxMachine::new();
        let events = push_all(&mut rx, &stream);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RxEvent::HeaderChecksum));
        assert!(matches!(events[1], RxEvent::Frame { .. }));
    }

    #[test]
    fn payload_checksum_failure_reports_header() {
        let mut frame = encode_frame(&header(0x26, 4), &[1, 2, 3, 4]);
        let len = frame.len();
        frame[len - 1] ^= 0x40; // corrupt the data CRC
        let mut rx = RxMachine::new();
        let events = push_all(&mut rx, &frame);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RxEvent::PayloadChecksum { header } => assert_eq!(header.opcode, 0x26),
            other => panic!("expected PayloadChecksum, got {other:?}"),
        }
        assert_eq!(rx.state(), RxState::Idle);
    }

    #[test]
    fn corrupt_header_byte_then_recovery() {
        let mut bad = encode_frame(&header(0x26, 0), &[]);
        bad[3] ^= 0x01; // flip a bit in CHAN
        let good = encode_frame(&header(0x12, 0), &[]);
        let mut stream = bad;
        stream.extend_from_slice(&good);
        let mut rx = RxMachine::new();
        let events = push_all(&mut rx, &stream);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RxEvent::HeaderChecksum));
        assert!(
            matches!(&events[1], RxEvent::Frame { header, .. } if header.opcode == 0x12),
            "second frame should decode cleanly"
        );
    }

    #[test]
    fn crc_disabled_accepts_bad_checksums() {
        let mut frame = encode_frame(&header(0x26, 2), &[7, 8]);
        frame[8] ^= 0xFF; // header CRC
        let len = frame.len();
        frame[len - 1] ^= 0xFF; // data CRC
        let mut rx = RxMachine::new();
        rx.set_check_crc(false);
        let events = push_all(&mut rx, &frame);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], RxEvent::Frame { payload, .. } if payload == &[7, 8]));
    }

    #[test]
    fn timeout_mid_frame() {
        let frame = encode_frame(&header(0x26, 16), &[0; 16]);
        let start = Instant::now();
        let mut rx = RxMachine::new();
        let mut events = Vec::new();
        rx.push(&frame[..12], start, &mut events);
        assert!(events.is_empty());
        assert_eq!(rx.state(), RxState::Data);

        assert!(rx.tick(start + Duration::from_millis(499)).is_none());
        let timeout = rx.tick(start + Duration::from_millis(500));
        assert_eq!(timeout, Some(RxEvent::Timeout));
        assert_eq!(rx.state(), RxState::Idle);
    }

    #[test]
    fn no_timeout_while_idle_or_scanning() {
        let start = Instant::now();
        let mut rx = RxMachine::new();
        let mut events = Vec::new();
        rx.push(&[0x11, 0x22], start, &mut events);
        assert_eq!(rx.state(), RxState::Sync);
        assert!(rx.tick(start + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn reset_abandons_partial_frame() {
        let frame = encode_frame(&header(0x26, 16), &[0; 16]);
        let mut rx = RxMachine::new();
        let mut events = Vec::new();
        rx.push(&frame[..14], Instant::now(), &mut events);
        rx.reset();
        assert_eq!(rx.state(), RxState::Idle);
        // A fresh frame parses cleanly after the reset
        let good = encode_frame(&header(0x00, 0), &[]);
        rx.push(&good, Instant::now(), &mut events);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn back_to_back_frames() {
        let mut stream = encode_frame(&header(0x01, 0), &[]);
        stream.extend_from_slice(&encode_frame(&header(0x26, 3), &[4, 5, 6]));
        stream.extend_from_slice(&encode_frame(&header(0x03, 0), &[]));
        let mut rx = RxMachine::new();
        let events = push_all(&mut rx, &stream);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| matches!(e, RxEvent::Frame { .. })));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use iris_core::frame::{encode_frame, FrameFlags};
    use proptest::prelude::*;

    /// Bytes that can never form the sync word.
    fn garbage() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(
            any::<u8>().prop_filter("no sync bytes", |b| *b != SYNC_BYTE_0 && *b != SYNC_BYTE_1),
            0..1024,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn resync_through_garbage(
            junk in garbage(),
            payload in proptest::collection::vec(any::<u8>(), 0..128),
            chunk in 1..64usize,
        ) {
            let header = Header {
                seq: 0,
                channel: 1,
                flags: FrameFlags::default(),
                opcode: 0x26,
                length: payload.len() as u16,
            };
            let mut stream = junk;
            stream.extend_from_slice(&encode_frame(&header, &payload));

            let mut rx = RxMachine::new();
            let mut events = Vec::new();
            for piece in stream.chunks(chunk) {
                rx.push(piece, Instant::now(), &mut events);
            }
            let frames: Vec<_> = events
                .iter()
                .filter(|e| matches!(e, RxEvent::Frame { .. }))
                .collect();
            prop_assert_eq!(frames.len(), 1);
        }

        #[test]
        fn arbitrary_streams_never_panic(stream in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let mut rx = RxMachine::new();
            let mut events = Vec::new();
            rx.push(&stream, Instant::now(), &mut events);
        }
    }
}
