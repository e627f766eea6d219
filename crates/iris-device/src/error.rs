//! Device-layer error types.

use iris_core::{FrameError, Status};
use iris_protocol::ProtocolError;
use iris_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("channel id {0} is reserved")]
    Reserved(u8),

    #[error("channel id {0} out of range")]
    OutOfRange(u8),

    #[error("channel id {0} already registered")]
    IdInUse(u8),

    #[error("no free channel slot")]
    NoFreeSlot,

    #[error("channel {0} not registered")]
    NotFound(u8),

    #[error("channel {id} init failed with status {status:?}")]
    InitFailed { id: u8, status: Status },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}
