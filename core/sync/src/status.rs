//! Vault status for presentation. Never fails; each field degrades on
//! its own when its source is slow or broken.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::state::SyncStatusBoard;
use pearl_common::{with_deadline, Deadline, DriveKey};
use pearl_vault::{EnsureOptions, VaultIdentity};

/// Status of the active vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultStatus {
    pub drive_key: Option<DriveKey>,
    pub connected: bool,
    pub peers_count: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub export_dir: Option<PathBuf>,
}

pub struct StatusFacade {
    identity: Arc<VaultIdentity>,
    board: Arc<SyncStatusBoard>,
    export_dir: Option<PathBuf>,
    probe_timeout: Duration,
}

impl StatusFacade {
    pub fn new(
        identity: Arc<VaultIdentity>,
        board: Arc<SyncStatusBoard>,
        export_dir: Option<PathBuf>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            board,
            export_dir,
            probe_timeout,
        }
    }

    /// Current status. Unknown parts come back empty instead of failing.
    pub async fn vault_get_status(&self) -> VaultStatus {
        let mut drive_key = self.identity.current_key();

        if drive_key.is_none() {
            match with_deadline(self.probe_timeout, self.identity.ensure_vault_config()).await {
                Deadline::Completed(Ok(key)) => drive_key = Some(key),
                Deadline::Completed(Err(e)) => {
                    warn!("Unable to ensure vault config while fetching status: {}", e)
                }
                Deadline::TimedOut => warn!("Vault config check timed out"),
            }
        }

        let probe = self
            .identity
            .lifecycle()
            .ensure_resolved(|| self.identity.current_key(), EnsureOptions::local());
        match with_deadline(self.probe_timeout, probe).await {
            Deadline::Completed(Ok((_, handle))) => {
                drive_key = Some(handle.key);
                self.board.record_peers(handle.peer_count);
            }
            Deadline::Completed(Err(e)) => warn!("Failed to fetch drive status: {}", e),
            Deadline::TimedOut => warn!("Status check timed out"),
        }

        let snapshot = self.board.snapshot();
        VaultStatus {
            drive_key,
            connected: snapshot.peers > 0 || snapshot.connected,
            peers_count: snapshot.peers,
            last_sync_at: snapshot.last_sync_at,
            export_dir: self.export_dir.clone(),
        }
    }
}
