//! Protocol error types

use thiserror::Error;

/// A message that could not be turned into a request
///
/// Always recoverable: the session logs it and carries on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not valid JSON, or JSON of the wrong shape
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required field is absent
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// The envelope type is not one we handle
    #[error("unknown message type `{0}`")]
    UnknownType(String),

    /// A `cmd` request we do not handle
    #[error("unknown command `{cmd}` with argument `{arg}`")]
    UnknownCommand { cmd: String, arg: String },
}
