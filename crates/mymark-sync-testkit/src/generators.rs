//! Proptest generators for property-based testing.

use proptest::prelude::*;

use mymark_sync_core::{KeyPrefix, StorageKey};

/// A key segment drawn from a small alphabet so prefixes collide often.
/// Includes NUL and `0xFF`-adjacent characters to exercise escaping.
pub fn segment() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => "[ab]{0,3}",
        1 => "[a\u{0}\u{ff}]{1,3}",
        1 => "[a-z0-9]{4,8}",
    ]
}

/// Generate a storage key of one to four segments.
pub fn storage_key() -> impl Strategy<Value = StorageKey> {
    prop::collection::vec(segment(), 1..=4).prop_map(|segments| {
        // The vec is never empty.
        StorageKey::new(segments).unwrap()
    })
}

/// Generate a prefix of up to three segments, including the empty prefix.
pub fn key_prefix() -> impl Strategy<Value = KeyPrefix> {
    prop::collection::vec(segment(), 0..=3).prop_map(KeyPrefix::new)
}

/// Generate a set of `(key, data)` pairs to seed a store with.
pub fn chunk_set(max: usize) -> impl Strategy<Value = Vec<(StorageKey, Vec<u8>)>> {
    prop::collection::vec(
        (storage_key(), prop::collection::vec(any::<u8>(), 0..16)),
        0..=max,
    )
}

/// Generate chunk data.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate arbitrary bytes that are not a CBOR map header.
pub fn non_map_frame() -> impl Strategy<Value = Vec<u8>> {
    (any::<u8>(), prop::collection::vec(any::<u8>(), 0..32)).prop_map(|(head, mut rest)| {
        // Major type 5 (maps) occupies 0xa0..=0xbf.
        let head = if (0xa0..=0xbf).contains(&head) { head ^ 0x40 } else { head };
        rest.insert(0, head);
        rest
    })
}
