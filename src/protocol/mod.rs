//! Signaling protocol
//!
//! JSON envelopes exchanged with the viewer over the signaling socket and
//! the data channel. Parsing never fails a session: every error here is a
//! [`ProtocolError`] the session logs and drops.

pub mod channel;
pub mod error;
pub mod message;
pub mod outbound;

pub use channel::{ChannelMessage, FileOffer};
pub use error::ProtocolError;
pub use message::{Command, ControlCommand, DeviceRequest, InboundMessage, Toggle};
pub use outbound::OutboundMessage;
