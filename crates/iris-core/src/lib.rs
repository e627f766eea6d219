//! Wire format and CRC primitives for the Iris camera protocol.
//!
//! This crate defines the stateless building blocks shared by the host and
//! device sides: the 10-byte frame header codec, flag and opcode
//! enumerations, status codes, and the incremental CRC-16/CRC-32
//! implementations used for header and payload validation.

pub mod constants;
pub mod crc;
pub mod error;
pub mod frame;
pub mod status;

pub use error::FrameError;
pub use frame::{Frame, FrameFlags, Header, Opcode};
pub use status::Status;
