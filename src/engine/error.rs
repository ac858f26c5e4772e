//! Media engine error types

use thiserror::Error;

/// Errors reported by a media engine or one of its handles
#[derive(Debug, Error)]
pub enum EngineError {
    /// A pipeline could not be constructed
    #[error("pipeline setup failed: {0}")]
    Setup(String),

    /// A session description was rejected
    #[error("invalid session description: {0}")]
    InvalidSdp(String),

    /// An ICE candidate was rejected
    #[error("invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    /// The operation needs a state the pipeline is not in
    #[error("pipeline not ready: {0}")]
    NotReady(&'static str),

    /// The data channel is no longer open
    #[error("data channel closed")]
    ChannelClosed,

    /// Playback of an uploaded file failed
    #[error("playback failed: {0}")]
    Playback(String),

    /// Recording could not be started
    #[error("recording failed: {0}")]
    Recording(String),
}
