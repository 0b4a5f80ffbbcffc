//! Random identifiers and secrets.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use zeroize::Zeroizing;

use pearl_common::DriveKey;

/// Default number of random bytes behind an identifier (32 hex chars).
pub const DEFAULT_ID_BYTES: usize = 16;

/// Fill a fresh buffer with `size` bytes from the thread-local CSPRNG.
pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; size];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Random lowercase hex identifier of `size` bytes.
pub fn random_id(size: usize) -> String {
    hex::encode(random_bytes(size))
}

/// Random base64 secret of `size` bytes, zeroized on drop.
pub fn random_secret(size: usize) -> Zeroizing<String> {
    let bytes = Zeroizing::new(random_bytes(size));
    Zeroizing::new(STANDARD.encode(bytes.as_slice()))
}

/// Allocate key material for a brand-new drive.
pub fn generate_drive_key() -> DriveKey {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    DriveKey::from_bytes(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_id_shape() {
        let id = random_id(DEFAULT_ID_BYTES);
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn test_random_ids_do_not_repeat() {
        let ids: HashSet<String> = (0..64).map(|_| random_id(DEFAULT_ID_BYTES)).collect();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn test_random_secret_is_base64() {
        let secret = random_secret(32);
        let decoded = STANDARD.decode(secret.as_bytes()).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_generated_drive_key_is_valid() {
        let key = generate_drive_key();
        assert!(DriveKey::is_valid(key.as_str()));
        assert_ne!(key, generate_drive_key());
    }
}
