//! Error types for camera-relay

use thiserror::Error;

use crate::engine::EngineError;
use crate::pool::PoolError;
use crate::protocol::ProtocolError;
use crate::registry::ConnectionId;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure (sockets, recordings, uploads)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The media engine refused an operation
    #[error("media engine error: {0}")]
    Engine(#[from] EngineError),

    /// A signaling or data-channel message could not be understood
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The work pool rejected a job
    #[error("work pool error: {0}")]
    Pool(#[from] PoolError),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(String),

    /// A session with this identity is already registered
    #[error("session {0} is already registered")]
    DuplicateSession(ConnectionId),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}
