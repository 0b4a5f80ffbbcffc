//! Starts and restarts replication of the active vault.

use std::sync::Arc;
use tracing::info;

use crate::state::SyncStatusBoard;
use pearl_common::{DriveKey, Result};
use pearl_vault::{DriveHandle, DriveLifecycleManager, EnsureOptions};

/// Drives replication and reports the outcome to the status board.
pub struct SyncCoordinator {
    lifecycle: Arc<DriveLifecycleManager>,
    board: Arc<SyncStatusBoard>,
}

impl SyncCoordinator {
    pub fn new(lifecycle: Arc<DriveLifecycleManager>, board: Arc<SyncStatusBoard>) -> Self {
        Self { lifecycle, board }
    }

    pub fn board(&self) -> &Arc<SyncStatusBoard> {
        &self.board
    }

    /// Replicate the current drive and publish it as connected.
    ///
    /// # Errors
    /// - `Error::Locked` if the storage is held by another process
    pub async fn start_vault_sync(&self) -> Result<DriveHandle> {
        let handle = self.lifecycle.ensure(EnsureOptions::replicated()).await?;
        self.publish(&handle);
        Ok(handle)
    }

    /// Like [`start_vault_sync`](Self::start_vault_sync). With a key the
    /// session is rebuilt onto it through the switch chain.
    pub async fn restart_vault_sync(&self, drive_key: Option<DriveKey>) -> Result<DriveHandle> {
        let handle = match drive_key {
            Some(key) => self.lifecycle.schedule_switch(key, true).wait().await?,
            None => self.lifecycle.ensure(EnsureOptions::replicated()).await?,
        };
        self.publish(&handle);
        Ok(handle)
    }

    fn publish(&self, handle: &DriveHandle) {
        self.board.record_sync(handle.peer_count);
        info!(
            "Vault sync active for {} ({} peers)",
            handle.key.short(),
            handle.peer_count
        );
    }
}
