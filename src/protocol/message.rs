//! Inbound signaling messages
//!
//! Everything a viewer sends over the signaling socket is a JSON envelope:
//!
//! ```text
//! {"type": "sdp",  "data": {"type": "offer" | "answer", "sdp": "..."}}
//! {"type": "ice",  "data": {"sdpMLineIndex": 0, "candidate": "..."}}
//! {"type": "ctrl", "data": {"type": "autotrack", "value": 1}}
//! {"type": "ctrl", "cmd": "record", "arg": "start"}
//! {"type": "v4l2", "data": {"id": 9963776, "value": 10}}
//! {"client": {"ip": "...", "username": "...", ...}}
//! ```

use serde::Deserialize;
use serde_json::Value;

use super::error::ProtocolError;
use crate::engine::{IceCandidate, SdpKind};
use crate::presence::ClientInfo;

/// Start/stop argument of a `cmd`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Start,
    Stop,
}

impl Toggle {
    fn parse(arg: &str) -> Option<Self> {
        match arg {
            "start" => Some(Toggle::Start),
            "stop" => Some(Toggle::Stop),
            _ => None,
        }
    }
}

/// Top-level `cmd`/`arg` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start or stop the shared recording
    Record(Toggle),
    /// Start or stop the talk-back path
    Talk(Toggle),
}

/// `ctrl` request addressed to the camera head
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Automatic subject tracking on/off
    Autotrack(i64),
    /// Navigation (pan, tilt, zoom, ...)
    Navigate(String),
}

/// Image control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRequest {
    /// Set one control
    Set { id: u32, value: i64 },
    /// Restore every control to its default
    Reset,
}

/// A parsed signaling message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Session description from the viewer
    Sdp { kind: SdpKind, sdp: String },
    /// Remote ICE candidate
    Ice(IceCandidate),
    /// Camera control
    Control(ControlCommand),
    /// Recording or talk-back command
    Command(Command),
    /// Image control
    Device(DeviceRequest),
    /// Viewer identification
    Hello(ClientInfo),
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    data: Option<Value>,
    cmd: Option<String>,
    arg: Option<String>,
    client: Option<ClientInfo>,
    // Data-channel spelling of the v4l2 request
    ctrl: Option<Value>,
    reset: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SdpData {
    #[serde(rename = "type")]
    kind: SdpKind,
    sdp: String,
}

#[derive(Debug, Deserialize)]
struct CtrlData {
    #[serde(rename = "type")]
    kind: String,
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DeviceData {
    #[serde(default)]
    reset: bool,
    id: Option<u32>,
    value: Option<i64>,
}

impl InboundMessage {
    /// Parse one signaling text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;

        if let Some(cmd) = raw.cmd.as_deref() {
            return parse_command(cmd, raw.arg.as_deref().unwrap_or_default())
                .map(InboundMessage::Command);
        }

        let kind = match raw.kind.as_deref() {
            Some(kind) => kind,
            None => {
                return match raw.client {
                    Some(client) => Ok(InboundMessage::Hello(client)),
                    None => Err(ProtocolError::MissingField("type")),
                };
            }
        };

        match kind {
            "sdp" => {
                let data: SdpData = serde_json::from_value(require_data(raw.data)?)?;
                Ok(InboundMessage::Sdp {
                    kind: data.kind,
                    sdp: data.sdp,
                })
            }
            "ice" => {
                let candidate: IceCandidate = serde_json::from_value(require_data(raw.data)?)?;
                Ok(InboundMessage::Ice(candidate))
            }
            "ctrl" => {
                let data: CtrlData = serde_json::from_value(require_data(raw.data)?)?;
                parse_control(data).map(InboundMessage::Control)
            }
            "v4l2" => parse_device(raw.data.or(raw.ctrl), raw.reset).map(InboundMessage::Device),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

fn require_data(data: Option<Value>) -> Result<Value, ProtocolError> {
    data.ok_or(ProtocolError::MissingField("data"))
}

fn parse_command(cmd: &str, arg: &str) -> Result<Command, ProtocolError> {
    let toggle = Toggle::parse(arg);
    match (cmd, toggle) {
        ("record", Some(t)) => Ok(Command::Record(t)),
        ("talk", Some(t)) => Ok(Command::Talk(t)),
        _ => Err(ProtocolError::UnknownCommand {
            cmd: cmd.to_string(),
            arg: arg.to_string(),
        }),
    }
}

fn parse_control(data: CtrlData) -> Result<ControlCommand, ProtocolError> {
    if data.kind == "autotrack" {
        let value = match data.value {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::Bool(b)) => Some(i64::from(b)),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        };
        return value
            .map(ControlCommand::Autotrack)
            .ok_or(ProtocolError::MissingField("value"));
    }

    match data.value {
        Some(Value::String(s)) => Ok(ControlCommand::Navigate(s)),
        Some(Value::Null) | None => Err(ProtocolError::MissingField("value")),
        Some(other) => Ok(ControlCommand::Navigate(other.to_string())),
    }
}

/// Parse a v4l2 request body, `{"reset": true}` or `{"id": .., "value": ..}`
pub(crate) fn parse_device(
    data: Option<Value>,
    reset: Option<bool>,
) -> Result<DeviceRequest, ProtocolError> {
    if reset == Some(true) {
        return Ok(DeviceRequest::Reset);
    }

    let data: DeviceData = serde_json::from_value(data.ok_or(ProtocolError::MissingField("data"))?)?;
    if data.reset {
        return Ok(DeviceRequest::Reset);
    }

    match (data.id, data.value) {
        (Some(id), Some(value)) => Ok(DeviceRequest::Set { id, value }),
        (None, _) => Err(ProtocolError::MissingField("id")),
        (_, None) => Err(ProtocolError::MissingField("value")),
    }
}
