//! Sync status as last reported by the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// Point-in-time view of the sync status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    /// Whether the coordinator last reported replication as active.
    pub connected: bool,
    /// Approximate number of live peer connections.
    pub peers: usize,
    /// When replication was last (re)started successfully.
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncUpdate {
    pub connected: Option<bool>,
    pub peers: Option<usize>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Shared, process-wide sync status.
#[derive(Debug, Default)]
pub struct SyncStatusBoard {
    snapshot: RwLock<SyncSnapshot>,
}

impl SyncStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn apply(&self, update: SyncUpdate) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        if let Some(connected) = update.connected {
            snapshot.connected = connected;
        }
        if let Some(peers) = update.peers {
            snapshot.peers = peers;
        }
        if let Some(at) = update.last_sync_at {
            snapshot.last_sync_at = Some(at);
        }
    }

    /// Replication (re)started with `peers` connections.
    pub fn record_sync(&self, peers: usize) {
        self.apply(SyncUpdate {
            connected: Some(true),
            peers: Some(peers),
            last_sync_at: Some(Utc::now()),
        });
    }

    /// Latest peer count from a status probe.
    pub fn record_peers(&self, peers: usize) {
        self.apply(SyncUpdate {
            peers: Some(peers),
            ..SyncUpdate::default()
        });
    }

    /// Replication is not running; peers and last sync time are kept.
    pub fn mark_disconnected(&self) {
        self.apply(SyncUpdate {
            connected: Some(false),
            ..SyncUpdate::default()
        });
    }

    /// Either live peers or an active coordinator.
    pub fn is_connected(&self) -> bool {
        let snapshot = self.snapshot();
        snapshot.peers > 0 || snapshot.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_updates_keep_other_fields() {
        let board = SyncStatusBoard::new();
        assert_eq!(board.snapshot(), SyncSnapshot::default());
        assert!(!board.is_connected());

        board.record_sync(2);
        let synced = board.snapshot();
        assert!(synced.connected);
        assert_eq!(synced.peers, 2);
        assert!(synced.last_sync_at.is_some());

        board.mark_disconnected();
        let after = board.snapshot();
        assert!(!after.connected);
        assert_eq!(after.peers, 2);
        assert_eq!(after.last_sync_at, synced.last_sync_at);
        // Peers alone still count as connected.
        assert!(board.is_connected());

        board.record_peers(0);
        assert!(!board.is_connected());
    }
}
