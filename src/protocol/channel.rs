//! Data-channel text messages

use serde::Deserialize;
use serde_json::Value;

use super::error::ProtocolError;
use super::message::{parse_device, DeviceRequest};

/// Upload announcement
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileOffer {
    /// Name chosen by the viewer
    pub name: String,
    /// Declared size in bytes
    pub size: u64,
    /// MIME type, if the browser knew it
    #[serde(rename = "type", default)]
    pub mime: Option<String>,
}

/// A parsed data-channel text message
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// Binary chunks for this file follow
    SendFile(FileOffer),
    /// Image control request
    Device(DeviceRequest),
    /// Anything that is not a JSON request (chat text, pings)
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawChannelMessage {
    #[serde(rename = "type")]
    kind: String,
    file: Option<FileOffer>,
    data: Option<Value>,
    ctrl: Option<Value>,
    reset: Option<bool>,
}

impl ChannelMessage {
    /// Parse one data-channel text payload
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawChannelMessage = match serde_json::from_str::<Value>(text) {
            Ok(value @ Value::Object(_)) => serde_json::from_value(value)?,
            _ => return Ok(ChannelMessage::Text(text.to_string())),
        };

        match raw.kind.as_str() {
            "sendfile" => raw
                .file
                .map(ChannelMessage::SendFile)
                .ok_or(ProtocolError::MissingField("file")),
            "v4l2" => parse_device(raw.ctrl.or(raw.data), raw.reset).map(ChannelMessage::Device),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}
