//! Hierarchical storage keys and their order-preserving byte encoding.
//!
//! A [`StorageKey`] is an ordered, non-empty list of UTF-8 segments such as
//! `[document_id, "incremental", chunk_hash]`. Relational backends store keys
//! in a single `BLOB` column, so the encoding must preserve order: comparing
//! two encodings with `memcmp` gives the same answer as comparing the keys
//! segment by segment.
//!
//! ## Encoding
//!
//! ```text
//! segment := escaped(bytes) 0x00 0x01
//! escaped := every 0x00 byte written as 0x00 0xFF
//! key     := segment+
//! ```
//!
//! The terminator `0x00 0x01` sorts below both an escaped zero (`0x00 0xFF`)
//! and any non-zero byte, so a segment sorts before all of its extensions, and
//! a key sorts before all keys that extend it.
//!
//! ## Prefix Ranges
//!
//! The encoding of a prefix is a byte prefix of the encoding of exactly the
//! keys that start with it. [`KeyPrefix::range`] turns that into a half-open
//! interval `[lower, upper)` where `upper` is [`prefix_successor`] of `lower`.
//! For a non-empty prefix this bumps the final terminator byte `0x01` to
//! `0x02`, which excludes sibling segments like `doc10` when the prefix is
//! `doc1`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

/// A non-empty, ordered sequence of key segments.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct StorageKey(Vec<String>);

impl StorageKey {
    /// Build a key from its segments. Fails on an empty segment list.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(CoreError::EmptyKey);
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether this key's segment sequence begins with `prefix`.
    pub fn starts_with(&self, prefix: &KeyPrefix) -> bool {
        self.0.starts_with(prefix.segments())
    }

    /// Order-preserving byte encoding.
    pub fn encode(&self) -> Vec<u8> {
        encode_segments(&self.0)
    }

    /// Inverse of [`StorageKey::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let segments = decode_segments(bytes)?;
        Self::new(segments)
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl TryFrom<Vec<String>> for StorageKey {
    type Error = CoreError;

    fn try_from(segments: Vec<String>) -> Result<Self> {
        Self::new(segments)
    }
}

impl From<StorageKey> for Vec<String> {
    fn from(key: StorageKey) -> Self {
        key.0
    }
}

/// A possibly-empty leading subsequence of key segments.
///
/// The empty prefix matches every key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPrefix(Vec<String>);

impl KeyPrefix {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The empty prefix.
    pub fn all() -> Self {
        Self(Vec::new())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_segments(&self.0)
    }

    /// The half-open byte interval covering every key with this prefix.
    pub fn range(&self) -> KeyRange {
        let lower = self.encode();
        let upper = prefix_successor(&lower);
        KeyRange { lower, upper }
    }
}

impl From<StorageKey> for KeyPrefix {
    fn from(key: StorageKey) -> Self {
        Self(key.0)
    }
}

impl From<&StorageKey> for KeyPrefix {
    fn from(key: &StorageKey) -> Self {
        Self(key.0.clone())
    }
}

/// Half-open interval `lower <= key < upper` over encoded keys.
///
/// `upper == None` means the range is unbounded above (empty prefix).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Vec<u8>,
    pub upper: Option<Vec<u8>>,
}

impl KeyRange {
    pub fn contains(&self, encoded: &[u8]) -> bool {
        encoded >= self.lower.as_slice()
            && self
                .upper
                .as_deref()
                .map_or(true, |upper| encoded < upper)
    }
}

/// Smallest byte string greater than every string that starts with `prefix`.
///
/// Trailing `0xFF` bytes are dropped and the last remaining byte incremented.
/// Returns `None` when no such bound exists (empty or all-`0xFF` input).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}

fn encode_segments(segments: &[String]) -> Vec<u8> {
    let len: usize = segments.iter().map(|s| s.len() + 2).sum();
    let mut out = Vec::with_capacity(len);
    for segment in segments {
        for &byte in segment.as_bytes() {
            if byte == ESCAPE {
                out.extend_from_slice(&[ESCAPE, ESCAPED_ZERO]);
            } else {
                out.push(byte);
            }
        }
        out.extend_from_slice(&[ESCAPE, TERMINATOR]);
    }
    out
}

fn decode_segments(bytes: &[u8]) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = Vec::new();
    let mut iter = bytes.iter().copied().enumerate();

    while let Some((offset, byte)) = iter.next() {
        if byte != ESCAPE {
            current.push(byte);
            continue;
        }
        match iter.next() {
            Some((_, ESCAPED_ZERO)) => current.push(0),
            Some((_, TERMINATOR)) => {
                segments.push(String::from_utf8(std::mem::take(&mut current))?);
            }
            Some(_) => {
                return Err(CoreError::MalformedKey {
                    offset,
                    reason: "invalid escape sequence",
                })
            }
            None => {
                return Err(CoreError::MalformedKey {
                    offset,
                    reason: "dangling escape byte",
                })
            }
        }
    }

    if !current.is_empty() {
        return Err(CoreError::MalformedKey {
            offset: bytes.len(),
            reason: "unterminated segment",
        });
    }

    Ok(segments)
}
