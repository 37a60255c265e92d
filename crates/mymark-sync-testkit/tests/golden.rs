//! Golden vectors for storage keys and wire frames.
//!
//! Anything else that reads or writes the same database must agree with
//! these encodings byte for byte.

use bytes::Bytes;

use mymark_sync_core::{KeyPrefix, StorageKey};
use mymark_sync_protocol::{decode, WireMessage};
use mymark_sync_testkit::vectors::{frame_vectors, key_vectors, range_vectors, verify_all_vectors};

#[test]
fn test_all_vectors_pass() {
    if let Err(mismatch) = verify_all_vectors() {
        panic!("golden vector mismatch: {}", mismatch);
    }
}

#[test]
fn test_key_vectors_decode_to_their_segments() {
    for v in key_vectors() {
        let bytes = hex::decode(v.encoded).unwrap();
        let key = StorageKey::decode(&bytes).unwrap();
        let segments: Vec<&str> = key.segments().iter().map(String::as_str).collect();
        assert_eq!(segments, v.segments, "{}", v.name);
    }
}

#[test]
fn test_range_bounds_bracket_their_keys() {
    for v in range_vectors() {
        let prefix = KeyPrefix::new(v.segments.iter().copied());
        let range = prefix.range();
        for k in key_vectors() {
            let key = StorageKey::new(k.segments.iter().copied()).unwrap();
            assert_eq!(
                range.contains(&key.encode()),
                key.starts_with(&prefix),
                "{} against {}",
                v.name,
                k.name
            );
        }
    }
}

#[test]
fn test_join_vector_carries_versions() {
    let join = frame_vectors()
        .into_iter()
        .find(|v| v.expected == Some(("join", "laptop")))
        .unwrap();
    let frame = Bytes::from(hex::decode(join.frame).unwrap());

    let WireMessage::Join(message) = decode(&frame).unwrap() else {
        panic!("expected join");
    };
    assert_eq!(message.supported_protocol_versions, Some(vec!["1".to_string()]));
    assert_eq!(message.peer_metadata, None);
}

#[test]
fn test_truncated_join_is_rejected() {
    let join = frame_vectors()
        .into_iter()
        .find(|v| v.expected.is_some())
        .unwrap();
    let bytes = hex::decode(join.frame).unwrap();

    for len in 0..bytes.len() {
        let frame = Bytes::copy_from_slice(&bytes[..len]);
        assert!(decode(&frame).is_err(), "prefix of {} bytes decoded", len);
    }
}
