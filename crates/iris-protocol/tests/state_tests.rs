//! Cross-module protocol state tests: the receive machine, sequencing,
//! fragmentation, and retransmission working together.

use std::time::{Duration, Instant};

use iris_core::frame::{encode_frame, FrameFlags, Header};
use iris_protocol::fragment::fragments;
use iris_protocol::recv::{RxEvent, RxMachine};
use iris_protocol::rtx::RtxQueue;
use iris_protocol::{Reassembler, RxCheck, SequenceState};

fn frame_bytes(seq: u8, channel: u8, flags: FrameFlags, opcode: u8, payload: &[u8]) -> Vec<u8> {
    let header = Header {
        seq,
        channel,
        flags,
        opcode,
        length: payload.len() as u16,
    };
    encode_frame(&header, payload)
}

#[test]
fn sequence_space_wraps_over_a_full_cycle() {
    // 256 in-order frames bring the TX counter back to zero, and the RX
    // side accepts every one of them through the state machine.
    let mut tx = SequenceState::new();
    let mut rx_seq = SequenceState::new();
    let mut rx = RxMachine::new();
    let mut events = Vec::new();

    for _ in 0..=256u32 {
        let seq = tx.next_tx();
        let bytes = frame_bytes(seq, 0, FrameFlags::default(), 0x01, &[]);
        rx.push(&bytes, Instant::now(), &mut events);
        let RxEvent::Frame { header, .. } = events.pop().expect("frame") else {
            panic!("expected a frame event");
        };
        assert_eq!(rx_seq.check_rx(header.seq, false), RxCheck::Accept);
        rx_seq.commit_rx(header.seq);
    }
    // 257 transmissions: 0..=255 then 0 again, counter now at 1
    assert_eq!(tx.tx_seq(), 1);
    assert_eq!(rx_seq.rx_seq(), Some(0));
}

#[test]
fn fragmented_transfer_with_sequenced_frames() {
    // Sender fragments a payload, stamping each chunk with the next TX
    // sequence; the receiver validates order and reassembles.
    let payload: Vec<u8> = (0..1000).map(|i| (i % 249) as u8).collect();
    let mut tx = SequenceState::new();
    let mut rx = RxMachine::new();
    let mut rx_seq = SequenceState::new();
    let mut reasm = Reassembler::new(4096);
    let mut events = Vec::new();

    for fragment in fragments(&payload, 256) {
        let flags = FrameFlags {
            fragment: fragment.more,
            ..Default::default()
        };
        let bytes = frame_bytes(tx.next_tx(), 3, flags, 0x27, fragment.data);
        rx.push(&bytes, Instant::now(), &mut events);
    }

    let mut assembled = None;
    for event in events.drain(..) {
        let RxEvent::Frame { header, payload } = event else {
            panic!("unexpected event");
        };
        assert_eq!(rx_seq.check_rx(header.seq, header.flags.rtx), RxCheck::Accept);
        rx_seq.commit_rx(header.seq);
        assembled = reasm
            .push(header.channel, header.opcode, &payload, header.flags.fragment)
            .unwrap();
    }
    assert_eq!(assembled.unwrap(), payload);
}

#[test]
fn retransmitted_frame_bypasses_sequence_validation() {
    let start = Instant::now();
    let mut tx = SequenceState::new();
    let mut rtx = RtxQueue::default();
    let mut rx_seq = SequenceState::new();
    rx_seq.commit_rx(41);

    // Original send tracked for acknowledgment
    let seq = tx.next_tx();
    let flags = FrameFlags {
        ack_req: true,
        ..Default::default()
    };
    rtx.push(seq, 2, 0x27, flags, vec![1, 2, 3], start).unwrap();

    // No ACK arrives; the retry carries RTX and is accepted out of order
    let actions = rtx.poll(start + Duration::from_millis(500));
    assert_eq!(actions.len(), 1);
    let iris_protocol::RtxAction::Resend { seq, flags, .. } = &actions[0] else {
        panic!("expected a resend");
    };
    assert!(flags.rtx);
    assert_eq!(rx_seq.check_rx(*seq, flags.rtx), RxCheck::Bypass);
    // The expectation is untouched for the next in-order frame
    assert_eq!(rx_seq.check_rx(42, false), RxCheck::Accept);
}

#[test]
fn sync_reset_clears_reassembly_and_retransmission() {
    let now = Instant::now();
    let mut seq = SequenceState::new();
    let mut reasm = Reassembler::new(1024);
    let mut rtx = RtxQueue::default();

    seq.next_tx();
    seq.commit_rx(9);
    reasm.push(1, 0x27, &[0; 16], true).unwrap();
    rtx.push(
        0,
        1,
        0x27,
        FrameFlags {
            ack_req: true,
            ..Default::default()
        },
        vec![],
        now,
    )
    .unwrap();

    // PROTO_SYNC semantics
    seq.reset();
    reasm.reset();
    rtx.clear();

    assert_eq!(seq.tx_seq(), 0);
    assert_eq!(seq.rx_seq(), None);
    assert!(!reasm.in_progress());
    assert!(rtx.is_empty());
}
