//! Shareable vault links: `pearl-vault://<drive-key>`.

use std::fmt;
use std::str::FromStr;

use pearl_common::{DriveKey, Error, Result};

/// URI scheme of vault links, without the `://` separator.
pub const LINK_SCHEME: &str = "pearl-vault";

const SEPARATOR: &str = "://";

/// A parsed vault link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VaultLink {
    drive_key: DriveKey,
}

impl VaultLink {
    pub fn new(drive_key: DriveKey) -> Self {
        Self { drive_key }
    }

    pub fn drive_key(&self) -> &DriveKey {
        &self.drive_key
    }

    pub fn into_drive_key(self) -> DriveKey {
        self.drive_key
    }

    /// Full link text for `key`.
    pub fn encode(key: &DriveKey) -> String {
        format!("{}{}{}", LINK_SCHEME, SEPARATOR, key)
    }

    /// Parse user-supplied link text.
    ///
    /// Surrounding whitespace is ignored, and anything after a `?` is
    /// dropped. The key is normalized to lowercase.
    ///
    /// # Errors
    /// - `Error::Validation` with a message suitable for the user
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation(format!(
                "Vault link is empty. Please paste a {}{} link.",
                LINK_SCHEME, SEPARATOR
            )));
        }

        let prefix = format!("{}{}", LINK_SCHEME, SEPARATOR);
        let Some(rest) = trimmed.strip_prefix(prefix.as_str()) else {
            let mut preview: String = trimmed.chars().take(20).collect();
            if trimmed.chars().count() > 20 {
                preview.push_str("...");
            }
            return Err(Error::Validation(format!(
                "Invalid link format. Expected link to start with \"{}\", but got: {}",
                prefix, preview
            )));
        };

        if rest.is_empty() {
            return Err(Error::Validation(format!(
                "Vault link is missing the drive key. Expected format: {}<64-character-hex-key>",
                prefix
            )));
        }

        let key_part = rest.split('?').next().unwrap_or_default().trim();
        if key_part.is_empty() {
            return Err(Error::Validation(
                "Vault link is missing the drive key after the scheme.".to_string(),
            ));
        }

        Ok(Self {
            drive_key: DriveKey::parse(key_part)?,
        })
    }
}

impl fmt::Display for VaultLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Self::encode(&self.drive_key))
    }
}

impl FromStr for VaultLink {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Link text for the active vault.
///
/// # Errors
/// - `Error::Validation` if no vault is active
pub fn create_link_string(key: Option<&DriveKey>) -> Result<String> {
    key.map(VaultLink::encode)
        .ok_or_else(|| Error::Validation("Vault is not initialized".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn message(input: &str) -> String {
        VaultLink::parse(input).unwrap_err().to_string()
    }

    #[test]
    fn test_encode_and_parse() {
        let key = DriveKey::parse(KEY).unwrap();
        let link = VaultLink::encode(&key);
        assert_eq!(link, format!("pearl-vault://{}", KEY));
        assert_eq!(VaultLink::parse(&link).unwrap().drive_key(), &key);
        assert_eq!(VaultLink::new(key).to_string(), link);
    }

    #[test]
    fn test_parse_normalizes_and_trims() {
        let upper = format!("  pearl-vault://{}?invite=1\n", KEY.to_uppercase());
        let link: VaultLink = upper.parse().unwrap();
        assert_eq!(link.drive_key().as_str(), KEY);
    }

    #[test]
    fn test_empty_link() {
        assert_eq!(
            message("   "),
            "Vault link is empty. Please paste a pearl-vault:// link."
        );
    }

    #[test]
    fn test_wrong_scheme_shows_preview() {
        assert_eq!(
            message("https://example.com/some/long/path"),
            "Invalid link format. Expected link to start with \"pearl-vault://\", but got: https://example.com/...",
        );
        assert_eq!(
            message("hyper://abc"),
            "Invalid link format. Expected link to start with \"pearl-vault://\", but got: hyper://abc",
        );
        assert!(message(&"x".repeat(20)).ends_with(&format!("got: {}", "x".repeat(20))));
    }

    #[test]
    fn test_missing_key() {
        assert_eq!(
            message("pearl-vault://"),
            "Vault link is missing the drive key. Expected format: pearl-vault://<64-character-hex-key>"
        );
        assert_eq!(
            message("pearl-vault://?x=1"),
            "Vault link is missing the drive key after the scheme."
        );
    }

    #[test]
    fn test_invalid_key_names_length() {
        let msg = message("pearl-vault://abc");
        assert!(msg.contains("64 hexadecimal characters"));
        assert!(msg.contains("3"));
    }

    #[test]
    fn test_create_link_requires_key() {
        assert!(create_link_string(None).is_err());
        let key = DriveKey::parse(KEY).unwrap();
        assert_eq!(
            create_link_string(Some(&key)).unwrap(),
            format!("pearl-vault://{}", KEY)
        );
    }
}
