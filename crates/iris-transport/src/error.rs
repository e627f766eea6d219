//! Transport error types.

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed by peer")]
    Closed,

    #[error("transport not connected")]
    NotConnected,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
