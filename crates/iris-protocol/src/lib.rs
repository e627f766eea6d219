//! Protocol state machines for the Iris camera protocol.
//!
//! This crate implements the stateful protocol logic between the wire codec
//! and the command dispatcher: the byte-stream receive state machine,
//! sequence/ACK tracking, fragmentation and reassembly, the retransmission
//! queue, capability negotiation, and the statistics block.
//!
//! Everything here is deliberately decoupled from I/O: state machines
//! consume bytes and explicit `Instant`s and produce decisions the caller
//! acts on, so the engine can be driven deterministically in tests.

pub mod caps;
pub mod error;
pub mod fragment;
pub mod recv;
pub mod rtx;
pub mod sequence;
pub mod stats;

pub use caps::Capabilities;
pub use error::ProtocolError;
pub use fragment::{fragments, Fragment, Reassembler};
pub use recv::{RxEvent, RxMachine, RxState};
pub use rtx::{RtxAction, RtxQueue};
pub use sequence::{RxCheck, SequenceState};
pub use stats::Stats;
