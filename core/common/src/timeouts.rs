//! Bounds for every network-facing wait.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-site wait limits. Serialized as milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Announcing a drive's discovery topic.
    #[serde(with = "millis")]
    pub discovery_flush: Duration,
    /// Initial peer search for a freshly opened drive.
    #[serde(with = "millis")]
    pub peer_discovery: Duration,
    /// Catching up with remote drive state.
    #[serde(with = "millis")]
    pub remote_update: Duration,
    /// Drive probe behind a status request.
    #[serde(with = "millis")]
    pub status_probe: Duration,
    /// Pre-fetching a single file before reading or deleting it.
    #[serde(with = "millis")]
    pub download: Duration,
}

impl Timeouts {
    /// Same limit everywhere; handy for tests.
    pub fn uniform(limit: Duration) -> Self {
        Self {
            discovery_flush: limit,
            peer_discovery: limit,
            remote_update: limit,
            status_probe: limit,
            download: limit,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            discovery_flush: Duration::from_secs(5),
            peer_discovery: Duration::from_secs(5),
            remote_update: Duration::from_secs(10),
            status_probe: Duration::from_secs(6),
            download: Duration::from_secs(10),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let t = Timeouts::default();
        assert_eq!(t.discovery_flush, Duration::from_secs(5));
        assert_eq!(t.remote_update, Duration::from_secs(10));
        assert_eq!(t.status_probe, Duration::from_secs(6));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let t: Timeouts = serde_json::from_str(r#"{"download": 250}"#).unwrap();
        assert_eq!(t.download, Duration::from_millis(250));
        assert_eq!(t.peer_discovery, Duration::from_secs(5));

        let json = serde_json::to_value(t).unwrap();
        assert_eq!(json["remote_update"], 10000);
    }
}
