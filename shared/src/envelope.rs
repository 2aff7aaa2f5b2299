//! The message envelope both agents speak on the wire.
//!
//! Every transport body is a JSON object `{"type": <tag>, "info": <payload>}`.
//! `connect` and `update` carry a mapping payload; `action` payloads are
//! game-defined and may be any JSON value.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// The four canonical envelope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Connect,
    Disconnect,
    Action,
    Update,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Connect => "connect",
            MessageKind::Disconnect => "disconnect",
            MessageKind::Action => "action",
            MessageKind::Update => "update",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub info: Value,
}

impl Envelope {
    pub fn new(kind: MessageKind, info: Value) -> Self {
        Self { kind, info }
    }
}

/// Encodes an envelope into a transport body.
pub fn encode(kind: MessageKind, info: Value) -> Vec<u8> {
    // A Value-backed envelope always serializes: keys are strings.
    serde_json::to_vec(&Envelope::new(kind, info)).unwrap_or_default()
}

/// Decodes a transport body into an envelope.
///
/// A body that is not a well-formed envelope, or whose type tag is not one
/// of the four canonical kinds, fails with [`ProtocolError::MessageType`]
/// identifying what was found.
pub fn decode(body: &[u8]) -> Result<Envelope, ProtocolError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| ProtocolError::MessageType(format!("<malformed envelope: {err}>")))?;

    let object = value
        .as_object()
        .ok_or_else(|| ProtocolError::MessageType("<non-object envelope>".to_string()))?;

    let tag = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::MessageType("<missing type>".to_string()))?;

    let kind = match tag {
        "connect" => MessageKind::Connect,
        "disconnect" => MessageKind::Disconnect,
        "action" => MessageKind::Action,
        "update" => MessageKind::Update,
        other => return Err(ProtocolError::MessageType(other.to_string())),
    };

    let info = object.get("info").cloned().unwrap_or(Value::Null);
    Ok(Envelope::new(kind, info))
}
