//! Deterministic hashing.
//!
//! `hash_parts` hashes the concatenation of its parts with BLAKE2b-256.
//! Parts of different kinds are normalized to bytes first, so
//! `HashPart::Number(7)` and `HashPart::Text("7")` hash identically.

use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::{Blake2b, Blake2bMac, Digest};

use pearl_common::{DriveKey, Error, Result};

/// Length of a discovery key in bytes.
pub const DISCOVERY_KEY_LENGTH: usize = 32;

/// Namespace mixed into every discovery key.
const DISCOVERY_NAMESPACE: &[u8] = b"pearl-discovery";

/// One input to [`hash_parts`].
#[derive(Debug, Clone, Copy)]
pub enum HashPart<'a> {
    Bytes(&'a [u8]),
    Text(&'a str),
    Number(i64),
    Bool(bool),
    Empty,
}

impl HashPart<'_> {
    fn write_to(&self, hasher: &mut Blake2b<U32>) {
        match self {
            HashPart::Bytes(bytes) => hasher.update(bytes),
            HashPart::Text(text) => hasher.update(text.as_bytes()),
            HashPart::Number(n) => hasher.update(n.to_string().as_bytes()),
            HashPart::Bool(b) => hasher.update(b.to_string().as_bytes()),
            HashPart::Empty => {}
        }
    }
}

impl<'a> From<&'a [u8]> for HashPart<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        HashPart::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for HashPart<'a> {
    fn from(text: &'a str) -> Self {
        HashPart::Text(text)
    }
}

impl From<i64> for HashPart<'_> {
    fn from(n: i64) -> Self {
        HashPart::Number(n)
    }
}

impl From<bool> for HashPart<'_> {
    fn from(b: bool) -> Self {
        HashPart::Bool(b)
    }
}

impl<'a, T> From<Option<T>> for HashPart<'a>
where
    T: Into<HashPart<'a>>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(HashPart::Empty)
    }
}

/// BLAKE2b-256 over the concatenated parts.
pub fn hash_parts(parts: &[HashPart<'_>]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    for part in parts {
        part.write_to(&mut hasher);
    }
    hasher.finalize().into()
}

/// Hex form of [`hash_parts`].
pub fn hash_hex(parts: &[HashPart<'_>]) -> String {
    hex::encode(hash_parts(parts))
}

/// Derive the peer-discovery topic for a drive.
///
/// Keyed BLAKE2b with the drive key as MAC key: peers holding the drive
/// key can compute it, observers of the topic cannot invert it.
pub fn discovery_key(drive_key: &DriveKey) -> Result<[u8; DISCOVERY_KEY_LENGTH]> {
    let key_bytes = hex::decode(drive_key.as_str())
        .map_err(|e| Error::Validation(format!("Drive key is not hex: {}", e)))?;
    let mut mac = Blake2bMac::<U32>::new_from_slice(&key_bytes)
        .map_err(|e| Error::Validation(format!("Drive key has invalid length: {}", e)))?;
    mac.update(DISCOVERY_NAMESPACE);
    Ok(mac.finalize().into_bytes().into())
}
