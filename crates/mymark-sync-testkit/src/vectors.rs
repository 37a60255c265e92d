//! Golden test vectors for deterministic verification.
//!
//! Key vectors pin the order-preserving storage key encoding; any other
//! implementation sharing a database must produce identical bytes. Frame
//! vectors pin what the codec accepts and rejects.

use bytes::Bytes;
use ciborium::Value;

use mymark_sync_core::{KeyPrefix, StorageKey};
use mymark_sync_protocol::decode;

/// A storage key and its expected encoding.
#[derive(Debug, Clone)]
pub struct KeyVector {
    pub name: &'static str,
    pub segments: &'static [&'static str],
    /// Expected encoding (hex).
    pub encoded: &'static str,
}

/// A prefix and the byte range it must select.
#[derive(Debug, Clone)]
pub struct RangeVector {
    pub name: &'static str,
    pub segments: &'static [&'static str],
    pub lower: &'static str,
    /// `None` when the range is unbounded above.
    pub upper: Option<&'static str>,
}

/// A wire frame and how the codec must treat it.
#[derive(Debug, Clone)]
pub struct FrameVector {
    pub name: &'static str,
    pub frame: &'static str,
    /// `Some((type, sender))` when the frame must decode.
    pub expected: Option<(&'static str, &'static str)>,
}

pub fn key_vectors() -> Vec<KeyVector> {
    vec![
        KeyVector {
            name: "single segment",
            segments: &["a"],
            encoded: "610001",
        },
        KeyVector {
            name: "two segments",
            segments: &["doc1", "x"],
            encoded: "646f63310001780001",
        },
        KeyVector {
            name: "embedded nul is escaped",
            segments: &["a\0b"],
            encoded: "6100ff620001",
        },
        KeyVector {
            name: "empty segment",
            segments: &[""],
            encoded: "0001",
        },
        KeyVector {
            name: "utf-8 passes through",
            segments: &["é"],
            encoded: "c3a90001",
        },
    ]
}

pub fn range_vectors() -> Vec<RangeVector> {
    vec![
        RangeVector {
            name: "document prefix",
            segments: &["doc1"],
            lower: "646f63310001",
            upper: Some("646f63310002"),
        },
        RangeVector {
            name: "empty prefix",
            segments: &[],
            lower: "",
            upper: None,
        },
    ]
}

pub fn frame_vectors() -> Vec<FrameVector> {
    vec![
        FrameVector {
            name: "join from laptop",
            // {"type": "join", "senderId": "laptop", "supportedProtocolVersions": ["1"]}
            frame: concat!(
                "a3",
                "6474797065",
                "646a6f696e",
                "6873656e6465724964",
                "666c6170746f70",
                "7819",
                "737570706f7274656450726f746f636f6c56657273696f6e73",
                "816131",
            ),
            expected: Some(("join", "laptop")),
        },
        FrameVector {
            name: "break code",
            frame: "ff",
            expected: None,
        },
        FrameVector {
            name: "map without type",
            frame: "a0",
            expected: None,
        },
        FrameVector {
            name: "non-text type",
            frame: "a1647479706501",
            expected: None,
        },
        FrameVector {
            name: "top-level array",
            frame: "80",
            expected: None,
        },
        FrameVector {
            name: "trailing byte",
            frame: "a0a0",
            expected: None,
        },
    ]
}

/// A repo frame with a field the codec does not model, built from a CBOR
/// value tree.
pub fn repo_frame_with_extra_field() -> Bytes {
    let value = Value::Map(vec![
        (Value::Text("type".into()), Value::Text("ephemeral".into())),
        (Value::Text("senderId".into()), Value::Text("phone".into())),
        (Value::Text("targetId".into()), Value::Text("server-alice".into())),
        (Value::Text("documentId".into()), Value::Text("doc1".into())),
        (Value::Text("count".into()), Value::Integer(7.into())),
        (Value::Text("data".into()), Value::Bytes(vec![1, 2, 3])),
    ]);
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = ciborium::ser::into_writer(&value, &mut buf);
    Bytes::from(buf)
}

/// Check every vector, returning the first mismatch.
pub fn verify_all_vectors() -> Result<(), String> {
    for v in key_vectors() {
        let key = StorageKey::new(v.segments.iter().copied())
            .map_err(|e| format!("{}: {}", v.name, e))?;
        let encoded = hex::encode(key.encode());
        if encoded != v.encoded {
            return Err(format!(
                "{}: expected {}, got {}",
                v.name, v.encoded, encoded
            ));
        }
        let decoded = StorageKey::decode(&key.encode()).map_err(|e| format!("{}: {}", v.name, e))?;
        if decoded != key {
            return Err(format!("{}: decode mismatch", v.name));
        }
    }

    for v in range_vectors() {
        let range = KeyPrefix::new(v.segments.iter().copied()).range();
        let lower = hex::encode(&range.lower);
        let upper = range.upper.as_ref().map(hex::encode);
        if lower != v.lower || upper.as_deref() != v.upper {
            return Err(format!(
                "{}: expected [{}, {:?}), got [{}, {:?})",
                v.name, v.lower, v.upper, lower, upper
            ));
        }
    }

    for v in frame_vectors() {
        let bytes = hex::decode(v.frame).map_err(|e| format!("{}: {}", v.name, e))?;
        let result = decode(&Bytes::from(bytes));
        match (v.expected, result) {
            (Some((kind, sender)), Ok(message)) => {
                if message.kind() != kind || message.sender_id().as_str() != sender {
                    return Err(format!(
                        "{}: decoded {} from {}",
                        v.name,
                        message.kind(),
                        message.sender_id()
                    ));
                }
            }
            (Some(_), Err(e)) => return Err(format!("{}: {}", v.name, e)),
            (None, Ok(message)) => {
                return Err(format!("{}: accepted as {}", v.name, message.kind()))
            }
            (None, Err(_)) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mymark_sync_protocol::WireMessage;

    #[test]
    fn all_vectors_verify() {
        verify_all_vectors().unwrap();
    }

    #[test]
    fn vectors_sort_like_their_segments() {
        let mut keys: Vec<_> = key_vectors()
            .iter()
            .map(|v| StorageKey::new(v.segments.iter().copied()).unwrap())
            .collect();
        let mut by_bytes = keys.clone();
        keys.sort();
        by_bytes.sort_by_key(|k| k.encode());
        assert_eq!(keys, by_bytes);
    }

    #[test]
    fn extra_fields_survive_decode() {
        let frame = repo_frame_with_extra_field();
        let WireMessage::Repo(message) = decode(&frame).unwrap() else {
            panic!("expected repo message");
        };
        assert_eq!(message.message_type(), "ephemeral");
        assert_eq!(message.data(), Some(&[1u8, 2, 3][..]));
        assert_eq!(message.as_bytes(), &frame);
    }
}
