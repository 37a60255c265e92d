//! Wire message types.
//!
//! Control messages (`join`, `peer`, `leave`, `error`) are fully typed. Repo
//! messages are kept as the decoded CBOR map plus the original frame bytes, so
//! they can be relayed verbatim and only the addressing fields are read.

use bytes::Bytes;
use ciborium::Value;
use serde::{Deserialize, Serialize};

use mymark_sync_core::{DocumentId, PeerId, PeerMetadata};

use crate::codec;
use crate::error::{ProtocolError, Result};

/// The only protocol version this server speaks.
pub const PROTOCOL_V1: &str = "1";

/// Frame limits.
pub mod limits {
    /// Largest frame accepted from a client.
    pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;
    /// Longest error text sent back to a client.
    pub const MAX_ERROR_MESSAGE: usize = 256;
}

/// Client→server: first message on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    pub sender_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_metadata: Option<PeerMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_protocol_versions: Option<Vec<String>>,
}

/// Server→client: handshake reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMessage {
    pub sender_id: PeerId,
    pub peer_metadata: PeerMetadata,
    pub selected_protocol_version: String,
    pub target_id: PeerId,
}

/// Client→server: the client is going away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveMessage {
    pub sender_id: PeerId,
}

/// Server→client: protocol violation report, sent right before closing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub sender_id: PeerId,
    pub message: String,
    pub target_id: PeerId,
}

impl ErrorMessage {
    pub fn new(sender_id: PeerId, target_id: PeerId, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.len() > limits::MAX_ERROR_MESSAGE {
            let mut end = limits::MAX_ERROR_MESSAGE;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        Self {
            sender_id,
            message,
            target_id,
        }
    }
}

/// An engine-level message (sync, ephemeral, request, doc-unavailable, ...).
///
/// Only `type`, `senderId`, `targetId` and `documentId` are read. Everything
/// else is opaque; `as_bytes` returns the exact frame that was received.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoMessage {
    message_type: String,
    sender_id: PeerId,
    target_id: PeerId,
    document_id: Option<DocumentId>,
    fields: Vec<(Value, Value)>,
    raw: Bytes,
}

impl RepoMessage {
    /// Build a new message with a binary `data` payload.
    pub fn new(
        message_type: impl Into<String>,
        sender_id: PeerId,
        target_id: PeerId,
        document_id: Option<DocumentId>,
        data: impl Into<Vec<u8>>,
    ) -> Result<Self> {
        let message_type = message_type.into();
        let mut fields = vec![
            (text("type"), text(&message_type)),
            (text("senderId"), text(sender_id.as_str())),
            (text("targetId"), text(target_id.as_str())),
        ];
        if let Some(document_id) = &document_id {
            fields.push((text("documentId"), text(document_id.as_str())));
        }
        fields.push((text("data"), Value::Bytes(data.into())));

        let raw = codec::to_bytes(&Value::Map(fields.clone()))?;
        Ok(Self {
            message_type,
            sender_id,
            target_id,
            document_id,
            fields,
            raw,
        })
    }

    /// Parse the addressing fields out of a decoded map.
    ///
    /// `raw` must be the frame `fields` was decoded from.
    pub(crate) fn from_map(fields: Vec<(Value, Value)>, raw: Bytes) -> Result<Self> {
        let message_type = required_text(&fields, "type")?;
        let sender_id = PeerId::new(required_text(&fields, "senderId")?);
        let target_id = PeerId::new(required_text(&fields, "targetId")?);
        let document_id = match lookup(&fields, "documentId") {
            None | Some(Value::Null) => None,
            Some(Value::Text(id)) => Some(DocumentId::new(id.clone())),
            Some(_) => {
                return Err(ProtocolError::Decode(
                    "documentId must be a string".to_string(),
                ))
            }
        };

        Ok(Self {
            message_type,
            sender_id,
            target_id,
            document_id,
            fields,
            raw,
        })
    }

    /// Same message with new addressing; every other field is kept.
    pub fn readdressed(&self, sender_id: &PeerId, target_id: &PeerId) -> Result<Self> {
        let fields: Vec<(Value, Value)> = self
            .fields
            .iter()
            .map(|(key, value)| match key.as_text() {
                Some("senderId") => (key.clone(), text(sender_id.as_str())),
                Some("targetId") => (key.clone(), text(target_id.as_str())),
                _ => (key.clone(), value.clone()),
            })
            .collect();

        let raw = codec::to_bytes(&Value::Map(fields.clone()))?;
        Ok(Self {
            message_type: self.message_type.clone(),
            sender_id: sender_id.clone(),
            target_id: target_id.clone(),
            document_id: self.document_id.clone(),
            fields,
            raw,
        })
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn sender_id(&self) -> &PeerId {
        &self.sender_id
    }

    pub fn target_id(&self) -> &PeerId {
        &self.target_id
    }

    pub fn document_id(&self) -> Option<&DocumentId> {
        self.document_id.as_ref()
    }

    /// The `data` payload, if present and binary.
    pub fn data(&self) -> Option<&[u8]> {
        match lookup(&self.fields, "data") {
            Some(Value::Bytes(data)) => Some(data),
            _ => None,
        }
    }

    /// The encoded frame.
    pub fn as_bytes(&self) -> &Bytes {
        &self.raw
    }
}

/// Every message kind that can appear on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Join(JoinMessage),
    Peer(PeerMessage),
    Leave(LeaveMessage),
    Error(ErrorMessage),
    Repo(RepoMessage),
}

impl WireMessage {
    pub fn sender_id(&self) -> &PeerId {
        match self {
            WireMessage::Join(m) => &m.sender_id,
            WireMessage::Peer(m) => &m.sender_id,
            WireMessage::Leave(m) => &m.sender_id,
            WireMessage::Error(m) => &m.sender_id,
            WireMessage::Repo(m) => m.sender_id(),
        }
    }

    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &str {
        match self {
            WireMessage::Join(_) => "join",
            WireMessage::Peer(_) => "peer",
            WireMessage::Leave(_) => "leave",
            WireMessage::Error(_) => "error",
            WireMessage::Repo(m) => m.message_type(),
        }
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

pub(crate) fn lookup<'a>(fields: &'a [(Value, Value)], name: &str) -> Option<&'a Value> {
    fields
        .iter()
        .find(|(key, _)| key.as_text() == Some(name))
        .map(|(_, value)| value)
}

fn required_text(fields: &[(Value, Value)], name: &str) -> Result<String> {
    match lookup(fields, name) {
        Some(Value::Text(value)) => Ok(value.clone()),
        Some(_) => Err(ProtocolError::Decode(format!("{} must be a string", name))),
        None => Err(ProtocolError::Decode(format!("missing {}", name))),
    }
}
