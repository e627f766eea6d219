//! Byte-stream transports for the Iris camera protocol.
//!
//! The protocol engine only sees the [`Transport`] trait: a byte channel
//! with non-blocking reads and all-or-nothing writes. Concrete transports
//! (TCP here; USB CDC or UART on real hardware) live behind it, so the
//! engine never knows which physical link it is speaking over.

pub mod error;
pub mod loopback;
pub mod ring;
pub mod tcp;
pub mod traits;

pub use error::TransportError;
pub use loopback::{loopback_pair, LoopbackTransport};
pub use ring::{ByteRing, SharedByteRing};
pub use tcp::TcpTransport;
pub use traits::Transport;
