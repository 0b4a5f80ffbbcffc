//! Common types used throughout Pearl.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a hex-encoded drive key.
pub const DRIVE_KEY_HEX_LEN: usize = 64;

/// Public key of a vault's replicated drive.
///
/// Always exactly 64 lowercase hex characters. Construction normalizes
/// case and rejects anything else, so a `DriveKey` never reaches
/// persistence or the wire in a malformed shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DriveKey(String);

impl DriveKey {
    /// Parse and normalize a hex drive key.
    ///
    /// # Errors
    /// - Returns `Error::Validation` naming the observed length if the
    ///   input is not exactly 64 hex characters
    pub fn parse(value: &str) -> crate::Result<Self> {
        if Self::is_valid(value) {
            return Ok(Self(value.to_ascii_lowercase()));
        }
        let len = value.chars().count();
        Err(crate::Error::Validation(format!(
            "Invalid drive key format. Expected {} hexadecimal characters, but got {} character{}. \
             The key should only contain 0-9 and a-f (or A-F).",
            DRIVE_KEY_HEX_LEN,
            len,
            if len == 1 { "" } else { "s" }
        )))
    }

    /// Build a key from raw 32-byte key material.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Check the shape without allocating.
    pub fn is_valid(value: &str) -> bool {
        value.len() == DRIVE_KEY_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Get the normalized hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for DriveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DriveKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DriveKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<DriveKey> for String {
    fn from(key: DriveKey) -> Self {
        key.0
    }
}

/// A path inside a drive, independent of the backing storage.
///
/// Paths are absolute and `/`-separated; the root is `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DrivePath {
    components: Vec<String>,
}

impl DrivePath {
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parse a `/`-separated path. Leading, trailing and doubled
    /// separators are ignored; `.` and `..` components are rejected.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let mut components = Vec::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            Self::check_component(part)?;
            components.push(part.to_string());
        }
        Ok(Self { components })
    }

    fn check_component(part: &str) -> crate::Result<()> {
        if part.is_empty() {
            return Err(crate::Error::Validation(
                "Path component cannot be empty".to_string(),
            ));
        }
        if part == "." || part == ".." {
            return Err(crate::Error::Validation(format!(
                "Path component '{}' is not allowed",
                part
            )));
        }
        if part.contains('/') || part.contains('\\') {
            return Err(crate::Error::Validation(
                "Path component cannot contain separators".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.components.split_last()?;
        Some(Self {
            components: rest.to_vec(),
        })
    }

    /// Last component, if any.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Append a single child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        Self::check_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// True if `self` is `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &DrivePath) -> bool {
        self.components.starts_with(&prefix.components)
    }

    /// Components below `prefix`, or `None` if `self` is not beneath it.
    pub fn strip_prefix(&self, prefix: &DrivePath) -> Option<&[String]> {
        self.components.strip_prefix(prefix.components.as_slice())
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }
}

impl fmt::Display for DrivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_key_normalizes_case() {
        let upper = "AB".repeat(32);
        let key = DriveKey::parse(&upper).unwrap();
        assert_eq!(key.as_str(), "ab".repeat(32));
        assert_eq!(key.short(), "abababab");
    }

    #[test]
    fn test_drive_key_rejects_wrong_length() {
        let err = DriveKey::parse("abc").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("64"));
        assert!(message.contains("got 3 characters"));
    }

    #[test]
    fn test_drive_key_rejects_non_hex() {
        let err = DriveKey::parse(&"g".repeat(64)).unwrap_err();
        assert!(matches!(err, crate::Error::Validation(_)));
    }

    #[test]
    fn test_drive_key_from_bytes() {
        let key = DriveKey::from_bytes(&[0xab; 32]);
        assert_eq!(key.as_str(), "ab".repeat(32));

        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        bytes[31] = 0xf0;
        let key = DriveKey::from_bytes(&bytes);
        assert!(key.as_str().starts_with("0100"));
        assert!(key.as_str().ends_with("00f0"));
        assert!(DriveKey::is_valid(key.as_str()));
    }

    #[test]
    fn test_drive_key_serde_validates() {
        let ok: DriveKey = serde_json::from_str(&format!("\"{}\"", "C".repeat(64))).unwrap();
        assert_eq!(ok.as_str(), "c".repeat(64));
        assert!(serde_json::from_str::<DriveKey>("\"nope\"").is_err());
    }

    #[test]
    fn test_drive_path_parse_and_display() {
        let path = DrivePath::parse("/notes//abc.md/").unwrap();
        assert_eq!(path.components(), &["notes", "abc.md"]);
        assert_eq!(path.to_string_path(), "/notes/abc.md");
        assert!(DrivePath::parse("/").unwrap().is_root());
    }

    #[test]
    fn test_drive_path_rejects_dot_segments() {
        assert!(DrivePath::parse("/notes/../secrets").is_err());
        assert!(DrivePath::root().join("a/b").is_err());
    }

    #[test]
    fn test_drive_path_prefix_helpers() {
        let notes = DrivePath::parse("/notes").unwrap();
        let file = notes.join("x.md").unwrap();
        assert!(file.starts_with(&notes));
        assert_eq!(file.strip_prefix(&notes).unwrap(), &["x.md".to_string()]);
        assert_eq!(file.parent().unwrap(), notes);
        assert_eq!(file.name(), Some("x.md"));
        assert!(DrivePath::parse("/other").unwrap().strip_prefix(&notes).is_none());
    }
}
