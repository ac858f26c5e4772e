//! Outbound signaling messages

use serde_json::{json, Value};

use crate::engine::{IceCandidate, SdpKind};
use crate::presence::OnlineUser;

/// A message for the viewer's signaling socket
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Local session description
    Sdp { kind: SdpKind, sdp: String },
    /// Local ICE candidate
    Ice(IceCandidate),
    /// Recording could not start because one is already running
    RecordBusy,
    /// Viewers currently online
    Users(Vec<OnlineUser>),
}

impl OutboundMessage {
    /// JSON form
    pub fn to_json(&self) -> Value {
        match self {
            OutboundMessage::Sdp { kind, sdp } => json!({
                "type": "sdp",
                "data": { "type": kind, "sdp": sdp },
            }),
            OutboundMessage::Ice(candidate) => json!({
                "type": "ice",
                "data": candidate,
            }),
            OutboundMessage::RecordBusy => json!({
                "type": "record",
                "data": { "record": "started" },
            }),
            OutboundMessage::Users(users) => json!({
                "type": "users",
                "data": users,
            }),
        }
    }

    /// Text frame payload
    pub fn to_text(&self) -> String {
        self.to_json().to_string()
    }
}
