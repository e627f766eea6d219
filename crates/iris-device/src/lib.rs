//! Device-side engine for the Iris camera protocol.
//!
//! Ties the protocol state machines to a transport and a channel registry:
//! received bytes are framed, sequenced, reassembled, and dispatched to
//! command handlers; responses and events flow back out through the
//! zero-copy transmit path. The engine is an explicit value threaded
//! through all handlers, so multiple instances can coexist in tests.

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod info;
pub mod logging;

pub use channel::{Channel, ChannelFlags, ChannelInfo, Registry, Shape, StreamChannel};
pub use config::DeviceConfig;
pub use engine::{Engine, SystemAction, HOST_LOCK_OWNER};
pub use error::{EngineError, RegistryError};
pub use event::{Event, EventQueue, EventSender, SystemEvent};
pub use info::DeviceInfo;
