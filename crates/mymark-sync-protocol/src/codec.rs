//! CBOR framing.
//!
//! One frame is exactly one CBOR map. Anything else (non-map values, trailing
//! bytes, a missing or non-string `type`) is a decode error.

use bytes::Bytes;
use ciborium::Value;
use serde::Serialize;

use crate::error::{ProtocolError, Result};
use crate::messages::{
    limits, lookup, ErrorMessage, JoinMessage, LeaveMessage, PeerMessage, RepoMessage,
    WireMessage,
};

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum Tagged<'a> {
    Join(&'a JoinMessage),
    Peer(&'a PeerMessage),
    Leave(&'a LeaveMessage),
    Error(&'a ErrorMessage),
}

/// Decode one frame.
pub fn decode(frame: &Bytes) -> Result<WireMessage> {
    if frame.len() > limits::MAX_FRAME_BYTES {
        return Err(ProtocolError::Decode(format!(
            "frame of {} bytes exceeds limit of {}",
            frame.len(),
            limits::MAX_FRAME_BYTES
        )));
    }

    let mut reader: &[u8] = frame;
    let value: Value = ciborium::de::from_reader(&mut reader)
        .map_err(|e| ProtocolError::Decode(e.to_string()))?;
    if !reader.is_empty() {
        return Err(ProtocolError::Decode(format!(
            "{} trailing bytes after message",
            reader.len()
        )));
    }

    let Value::Map(fields) = value else {
        return Err(ProtocolError::Decode("message is not a map".to_string()));
    };

    let message_type = match lookup(&fields, "type") {
        Some(Value::Text(t)) => t.clone(),
        Some(_) => return Err(ProtocolError::Decode("type must be a string".to_string())),
        None => return Err(ProtocolError::Decode("missing type".to_string())),
    };

    let message = match message_type.as_str() {
        "join" => WireMessage::Join(deserialize(Value::Map(fields))?),
        "peer" => WireMessage::Peer(deserialize(Value::Map(fields))?),
        "leave" => WireMessage::Leave(deserialize(Value::Map(fields))?),
        "error" => WireMessage::Error(deserialize(Value::Map(fields))?),
        _ => WireMessage::Repo(RepoMessage::from_map(fields, frame.clone())?),
    };

    Ok(message)
}

/// Encode one frame. Repo messages are written back byte-for-byte.
pub fn encode(message: &WireMessage) -> Result<Bytes> {
    let tagged = match message {
        WireMessage::Join(m) => Tagged::Join(m),
        WireMessage::Peer(m) => Tagged::Peer(m),
        WireMessage::Leave(m) => Tagged::Leave(m),
        WireMessage::Error(m) => Tagged::Error(m),
        WireMessage::Repo(m) => return Ok(m.as_bytes().clone()),
    };
    to_bytes(&tagged)
}

impl WireMessage {
    pub fn encode(&self) -> Result<Bytes> {
        encode(self)
    }
}

pub(crate) fn to_bytes<T: Serialize>(value: &T) -> Result<Bytes> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

fn deserialize<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    value
        .deserialized()
        .map_err(|e| ProtocolError::Decode(e.to_string()))
}
