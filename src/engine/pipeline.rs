//! Media engine contract
//!
//! The relay never touches media internals. It creates per-session pipelines
//! through a [`MediaEngine`], drives negotiation through the returned handles,
//! and receives the engine's asynchronous callbacks as [`EngineEvent`]s posted
//! to the owning session's inbox.
//!
//! Every handle is released by value (`release(self: Box<Self>)`), so a
//! released handle cannot be used again.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::EngineError;
use crate::bus::FrameSink;
use crate::registry::ConnectionId;
use crate::session::EngineEvents;

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// An ICE candidate as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Media line the candidate belongs to
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u32,
    /// Candidate attribute line
    pub candidate: String,
}

impl IceCandidate {
    pub fn new(sdp_m_line_index: u32, candidate: impl Into<String>) -> Self {
        Self {
            sdp_m_line_index,
            candidate: candidate.into(),
        }
    }
}

/// Which of a session's two media paths raised an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineRole {
    /// Camera to viewer
    Send,
    /// Viewer microphone to server (talk-back)
    Receive,
}

/// Peer connection state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Direction of a data channel relative to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDirection {
    /// Created by the server when the send path comes up
    Outbound,
    /// Opened by the viewer
    Inbound,
}

/// Asynchronous notification from a pipeline
pub enum EngineEvent {
    /// The send path wants an offer
    NegotiationNeeded,
    /// Offer creation finished
    OfferCreated(String),
    /// Answer creation finished
    AnswerCreated(String),
    /// A local ICE candidate was gathered
    LocalCandidate(IceCandidate),
    /// Peer connection state changed
    ConnectionState(PeerConnectionState),
    /// Offer or answer creation failed
    NegotiationFailed(String),
    /// A data channel became usable
    DataChannelOpened {
        direction: ChannelDirection,
        channel: Box<dyn DataChannel>,
    },
    /// Text message on a data channel
    DataChannelText(String),
    /// Binary message on a data channel
    DataChannelBinary(Bytes),
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::NegotiationNeeded => f.write_str("NegotiationNeeded"),
            EngineEvent::OfferCreated(sdp) => write!(f, "OfferCreated({} bytes)", sdp.len()),
            EngineEvent::AnswerCreated(sdp) => write!(f, "AnswerCreated({} bytes)", sdp.len()),
            EngineEvent::LocalCandidate(c) => write!(f, "LocalCandidate({:?})", c),
            EngineEvent::ConnectionState(s) => write!(f, "ConnectionState({:?})", s),
            EngineEvent::NegotiationFailed(r) => write!(f, "NegotiationFailed({})", r),
            EngineEvent::DataChannelOpened { direction, channel } => {
                write!(f, "DataChannelOpened({:?}, {})", direction, channel.label())
            }
            EngineEvent::DataChannelText(t) => write!(f, "DataChannelText({} bytes)", t.len()),
            EngineEvent::DataChannelBinary(b) => write!(f, "DataChannelBinary({} bytes)", b.len()),
        }
    }
}

/// A data channel handle
pub trait DataChannel: Send {
    /// Channel label
    fn label(&self) -> &str;

    /// Send a text message
    fn send_text(&self, text: &str) -> Result<(), EngineError>;

    /// Close the channel and release the handle
    fn close(self: Box<Self>);
}

/// Per-session send path: camera frames in, WebRTC out
pub trait SendPipeline: Send {
    /// Ingestion point for encoded video
    fn video_sink(&self) -> Arc<dyn FrameSink>;

    /// Ingestion point for encoded audio
    fn audio_sink(&self) -> Arc<dyn FrameSink>;

    /// Begin offer creation; completion arrives as `OfferCreated`
    fn create_offer(&mut self) -> Result<(), EngineError>;

    /// Apply the viewer's session description
    fn set_remote_description(&mut self, kind: SdpKind, sdp: &str) -> Result<(), EngineError>;

    /// Apply a remote ICE candidate
    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), EngineError>;

    /// Stop and release the pipeline
    fn release(self: Box<Self>);
}

/// Per-session receive path for talk-back audio
pub trait ReceivePipeline: Send {
    /// Apply the viewer's offer
    fn set_remote_description(&mut self, kind: SdpKind, sdp: &str) -> Result<(), EngineError>;

    /// Begin answer creation; completion arrives as `AnswerCreated`
    fn create_answer(&mut self) -> Result<(), EngineError>;

    /// Apply a remote ICE candidate
    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), EngineError>;

    /// Stop and release the pipeline
    fn release(self: Box<Self>);
}

/// A running recording
pub trait RecordingPipeline: Send {
    /// File being written
    fn path(&self) -> &Path;

    /// Finalize the file and release the pipeline
    fn stop(self: Box<Self>);
}

/// Factory for everything media
///
/// Implementations own capture, encoding, and the peer connections. Events
/// for a pipeline must be posted through the `EngineEvents` it was created
/// with; they may be posted from any thread.
pub trait MediaEngine: Send + Sync + 'static {
    /// Build the send path for a new session
    fn create_send_pipeline(
        &self,
        session: ConnectionId,
        events: EngineEvents,
    ) -> Result<Box<dyn SendPipeline>, EngineError>;

    /// Build the talk-back receive path for a session
    fn create_receive_pipeline(
        &self,
        session: ConnectionId,
        events: EngineEvents,
    ) -> Result<Box<dyn ReceivePipeline>, EngineError>;

    /// Start writing the camera feed to `path`
    fn start_recording(&self, path: &Path) -> Result<Box<dyn RecordingPipeline>, EngineError>;

    /// Play an uploaded media file on the server's output device
    ///
    /// Blocking; called from the work pool.
    fn play_file(&self, path: &Path) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_wire_names() {
        let c = IceCandidate::new(1, "candidate:1 1 UDP 1 10.0.0.1 5000 typ host");
        let json = serde_json::to_value(&c).unwrap();

        assert_eq!(json["sdpMLineIndex"], 1);
        assert_eq!(json["candidate"], "candidate:1 1 UDP 1 10.0.0.1 5000 typ host");
    }

    #[test]
    fn test_candidate_ignores_browser_extras() {
        let json = r#"{"candidate":"candidate:0","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"x"}"#;
        let c: IceCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(c.sdp_m_line_index, 0);
    }

    #[test]
    fn test_sdp_kind_serde() {
        assert_eq!(serde_json::to_string(&SdpKind::Offer).unwrap(), "\"offer\"");
        let kind: SdpKind = serde_json::from_str("\"answer\"").unwrap();
        assert_eq!(kind, SdpKind::Answer);
        assert!(serde_json::from_str::<SdpKind>("\"pranswer\"").is_err());
    }
}
