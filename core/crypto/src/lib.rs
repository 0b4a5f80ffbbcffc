//! Randomness and hashing primitives for Pearl.
//!
//! This module provides:
//! - Random bytes, hex identifiers and base64 secrets
//! - Deterministic BLAKE2b hashing over heterogeneous parts
//! - Drive key generation and discovery-key derivation
//!
//! # Security Guarantees
//! - Secrets are returned in zeroizing wrappers
//! - Discovery keys never reveal the drive key they are derived from

pub mod hash;
pub mod random;

pub use hash::{discovery_key, hash_hex, hash_parts, HashPart, DISCOVERY_KEY_LENGTH};
pub use random::{generate_drive_key, random_bytes, random_id, random_secret, DEFAULT_ID_BYTES};
