//! The API the UI layer talks to.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::events::{SubscriptionId, VaultEvent, VaultEventKind, VaultEvents};
use pearl_common::{DriveKey, Error, Result};
use pearl_notes::{ExportPaths, Note, NoteDraft, NoteSummary, NoteUpdate, NotesMirror, NotesStore};
use pearl_storage::{DiskDriveStore, DriveStore, MemoryDriveStore, MemorySwarm, SwarmFactory};
use pearl_sync::{StatusFacade, SyncCoordinator, SyncStatusBoard, VaultStatus};
use pearl_vault::{
    DriveActivity, DriveLifecycleManager, DriveSession, JsonFileStore, KeyValueStore,
    MemoryKeyValueStore, RecentVault, VaultIdentity,
};

/// Create-or-update request. No id means create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultLinkInfo {
    pub link_string: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentVaultList {
    pub current_key: Option<DriveKey>,
    pub recent_vaults: Vec<RecentVault>,
}

/// Immediate answer to a join request; the outcome arrives as an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JoinStatus {
    Initiated,
}

/// One long-lived core per process.
pub struct CoreFacade {
    config: CoreConfig,
    session: Arc<DriveSession>,
    lifecycle: Arc<DriveLifecycleManager>,
    identity: Arc<VaultIdentity>,
    notes: NotesStore,
    coordinator: Arc<SyncCoordinator>,
    status: StatusFacade,
    events: Arc<VaultEvents>,
    initialized: Mutex<bool>,
}

impl CoreFacade {
    pub fn new(
        config: CoreConfig,
        store: Arc<dyn DriveStore>,
        swarm_factory: SwarmFactory,
        settings: Arc<dyn KeyValueStore>,
    ) -> Self {
        let timeouts = config.timeouts;
        let export_paths = config.export_paths();

        let session = Arc::new(DriveSession::new(store, swarm_factory, timeouts));
        let lifecycle = Arc::new(DriveLifecycleManager::new(session.clone()));
        let identity = Arc::new(VaultIdentity::new(settings, lifecycle.clone()));
        let board = Arc::new(SyncStatusBoard::new());

        let notes = NotesStore::new(
            identity.clone(),
            NotesMirror::new(export_paths.clone()),
            timeouts.download,
        );
        let coordinator = Arc::new(SyncCoordinator::new(lifecycle.clone(), board.clone()));
        let status = StatusFacade::new(
            identity.clone(),
            board,
            Some(export_paths.notes_root),
            timeouts.status_probe,
        );

        Self {
            config,
            session,
            lifecycle,
            identity,
            notes,
            coordinator,
            status,
            events: Arc::new(VaultEvents::new()),
            initialized: Mutex::new(false),
        }
    }

    /// Disk-backed core rooted at `config.storage_dir`. There is no
    /// network transport, so the swarm only ever sees this device.
    pub fn open(config: CoreConfig) -> Self {
        let store = Arc::new(DiskDriveStore::new(&config.storage_dir));
        let settings = Arc::new(JsonFileStore::new(config.settings_path()));
        let swarm = Arc::new(MemorySwarm::new());
        Self::new(config, store, swarm.factory(), settings)
    }

    /// Fully in-memory core.
    pub fn in_memory(config: CoreConfig) -> Self {
        let swarm = Arc::new(MemorySwarm::new());
        Self::new(
            config,
            Arc::new(MemoryDriveStore::new()),
            swarm.factory(),
            Arc::new(MemoryKeyValueStore::new()),
        )
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<VaultEvents> {
        &self.events
    }

    pub fn export_paths(&self) -> &ExportPaths {
        self.notes.mirror().paths()
    }

    /// Storage held elsewhere is not fatal: sync is reported as off.
    fn tolerate_locked(&self, result: Result<()>) -> Result<()> {
        match result {
            Err(e) if e.is_locked() => {
                warn!("Vault storage is already in use; continuing without sync.");
                self.coordinator.board().mark_disconnected();
                Ok(())
            }
            other => other,
        }
    }

    /// Make sure a vault exists and start sync. Only the first successful
    /// call does any work.
    pub async fn initialize_core(&self) -> Result<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }

        let started = async {
            self.identity.ensure_vault_config().await?;
            self.coordinator.start_vault_sync().await?;
            Ok(())
        }
        .await;
        self.tolerate_locked(started)?;

        *initialized = true;
        info!("Pearl core initialized");
        Ok(())
    }

    /// Restart replication of the current vault.
    pub async fn restart_vault_sync(&self) -> Result<()> {
        let restarted = self.coordinator.restart_vault_sync(None).await.map(|_| ());
        self.tolerate_locked(restarted)
    }

    pub async fn list_notes(&self) -> Result<Vec<NoteSummary>> {
        self.identity.ensure_vault_config().await?;
        Ok(self.notes.list_notes().await)
    }

    pub async fn get_note(&self, id: &str) -> Result<Note> {
        self.identity.ensure_vault_config().await?;
        self.notes.read_note(id).await
    }

    /// Create a note, or update it in place when `input.id` is set.
    pub async fn save_note(&self, input: NoteInput) -> Result<Note> {
        self.identity.ensure_vault_config().await?;
        match input.id.filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                self.notes
                    .update_note(
                        &id,
                        NoteUpdate {
                            title: Some(input.title),
                            body: Some(input.body),
                        },
                    )
                    .await
            }
            None => {
                self.notes
                    .create_note(NoteDraft {
                        title: input.title,
                        body: input.body,
                    })
                    .await
            }
        }
    }

    pub async fn delete_note(&self, id: &str) -> Result<()> {
        self.identity.ensure_vault_config().await?;
        self.notes.delete_note(id).await
    }

    pub async fn get_vault_status(&self) -> VaultStatus {
        self.status.vault_get_status().await
    }

    pub async fn create_vault_link(&self) -> Result<VaultLinkInfo> {
        Ok(VaultLinkInfo {
            link_string: self.identity.create_vault_link().await?,
        })
    }

    pub async fn get_current_vault_key(&self) -> Result<Option<DriveKey>> {
        Ok(Some(self.identity.ensure_vault_config().await?))
    }

    /// Start joining the vault named by `link`.
    ///
    /// Validation happens before this returns; a malformed link is an
    /// error and changes nothing. Everything after that is reported as a
    /// [`VaultEvent::Joined`] or [`VaultEvent::JoinError`].
    pub fn join_vault_link(&self, link: &str) -> Result<JoinStatus> {
        let pending = self.identity.begin_join(link)?;
        let previous_key = pending.previous_key().cloned();

        let identity = self.identity.clone();
        let coordinator = self.coordinator.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = async {
                let joined = identity.finish_join(pending).await?;
                match coordinator
                    .restart_vault_sync(Some(joined.drive_key.clone()))
                    .await
                {
                    Ok(_) => {}
                    Err(e) if e.is_locked() => coordinator.board().mark_disconnected(),
                    Err(e) => return Err(e),
                }
                Ok::<_, Error>(joined)
            }
            .await;

            match outcome {
                Ok(joined) => events.emit(VaultEvent::Joined {
                    drive_key: joined.drive_key,
                    previous_key: joined.previous_key,
                }),
                Err(e) => {
                    warn!("Join failed: {}", e);
                    events.emit(VaultEvent::JoinError {
                        error: e.to_string(),
                        previous_key,
                    });
                }
            }
        });

        Ok(JoinStatus::Initiated)
    }

    pub async fn recent_vaults(&self) -> Result<RecentVaultList> {
        let current_key = self.identity.ensure_vault_config().await?;
        Ok(RecentVaultList {
            current_key: Some(current_key),
            recent_vaults: self.identity.recent_vaults(),
        })
    }

    pub fn add_recent_vault(&self, drive_key: &str, label: Option<&str>) -> Vec<RecentVault> {
        self.identity.add_recent_vault(drive_key, label)
    }

    pub fn on(
        &self,
        kind: VaultEventKind,
        handler: impl Fn(&VaultEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.on(kind, handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    /// Mirror every note to the export folder and wait for it.
    pub async fn export_all_notes(&self) {
        self.notes.mirror().export_all(None).await;
    }

    /// Wait for scheduled switches and background replication.
    pub async fn settle(&self) {
        self.lifecycle.settle().await;
    }

    pub fn activity(&self) -> DriveActivity {
        self.lifecycle.activity()
    }

    /// Let pending work finish, then release the drive and the storage.
    pub async fn shutdown(&self) -> Result<()> {
        self.lifecycle.settle().await;
        self.notes.mirror().export_all(None).await;
        self.session.dispose().await?;
        *self.initialized.lock().await = false;
        Ok(())
    }
}
