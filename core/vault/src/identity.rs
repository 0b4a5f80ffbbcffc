//! Which vault this device is on, and which ones it has visited.
//!
//! The active drive key is persisted in settings and cached in memory.
//! Joining a link persists the new key before the switch runs, and
//! restores the previous state exactly if the switch fails.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::lifecycle::{DriveLifecycleManager, SwitchTicket};
use crate::link::{create_link_string, VaultLink};
use crate::session::{DriveHandle, EnsureOptions};
use crate::settings::KeyValueStore;
use pearl_common::{DriveKey, Result};

/// Settings key holding the active drive key.
pub const DRIVE_KEY_SETTING: &str = "pearl-drive-key";
/// Settings key holding the recent-vaults JSON list.
pub const RECENT_VAULTS_SETTING: &str = "pearl-recent-vaults";
/// Maximum number of remembered vaults.
pub const RECENT_VAULT_LIMIT: usize = 8;

/// A previously used vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentVault {
    pub drive_key: DriveKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Outcome of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedVault {
    pub drive_key: DriveKey,
    pub previous_key: Option<DriveKey>,
}

/// Older builds stored `{"driveKey": ..., "secretKey": ...}`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyDriveSetting {
    drive_key: Option<String>,
}

/// A join whose key is persisted and whose switch is scheduled.
///
/// Finish it with [`VaultIdentity::finish_join`].
pub struct PendingJoin {
    drive_key: DriveKey,
    previous_key: Option<DriveKey>,
    switch: SwitchTicket,
}

impl PendingJoin {
    pub fn drive_key(&self) -> &DriveKey {
        &self.drive_key
    }

    pub fn previous_key(&self) -> Option<&DriveKey> {
        self.previous_key.as_ref()
    }
}

/// Persisted identity of the active vault.
pub struct VaultIdentity {
    settings: Arc<dyn KeyValueStore>,
    lifecycle: Arc<DriveLifecycleManager>,
    cached_key: Arc<RwLock<Option<DriveKey>>>,
}

impl VaultIdentity {
    pub fn new(settings: Arc<dyn KeyValueStore>, lifecycle: Arc<DriveLifecycleManager>) -> Self {
        Self {
            settings,
            lifecycle,
            cached_key: Arc::new(RwLock::new(None)),
        }
    }

    pub fn lifecycle(&self) -> &Arc<DriveLifecycleManager> {
        &self.lifecycle
    }

    fn set_cache(&self, key: Option<DriveKey>) {
        *self.cached_key.write().unwrap_or_else(|e| e.into_inner()) = key;
    }

    fn cache(&self) -> Option<DriveKey> {
        self.cached_key
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Forget the in-memory key; the next read goes to settings.
    pub fn invalidate_cache(&self) {
        self.set_cache(None);
    }

    /// Decode the persisted key. Accepts plain hex or the legacy JSON
    /// object; anything else reads as "no key".
    pub fn stored_key(&self) -> Option<DriveKey> {
        let raw = match self.settings.get(DRIVE_KEY_SETTING) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read stored drive key: {}", e);
                return None;
            }
        };
        let trimmed = raw.trim();

        if let Ok(key) = DriveKey::parse(trimmed) {
            return Some(key);
        }

        match serde_json::from_str::<LegacyDriveSetting>(trimmed) {
            Ok(LegacyDriveSetting {
                drive_key: Some(legacy),
            }) => DriveKey::parse(&legacy).ok(),
            _ => {
                debug!("Ignoring unrecognized stored drive key");
                None
            }
        }
    }

    fn persist_key(&self, key: &DriveKey) -> Result<()> {
        self.settings.set(DRIVE_KEY_SETTING, key.as_str())
    }

    /// Active key: the cache if warm, otherwise settings.
    pub fn current_key(&self) -> Option<DriveKey> {
        if let Some(key) = self.cache() {
            return Some(key);
        }
        let stored = self.stored_key();
        if stored.is_some() {
            self.set_cache(stored.clone());
        }
        stored
    }

    /// Make sure a vault exists and return its key.
    ///
    /// Opens the stored drive, or allocates one on first run. Persists the
    /// resulting key if it differs from what was stored. Idempotent:
    /// repeated calls return the same key and allocate nothing new.
    pub async fn ensure_vault_config(&self) -> Result<DriveKey> {
        Ok(self.ensure_drive().await?.key)
    }

    /// Like [`ensure_vault_config`](Self::ensure_vault_config), returning
    /// the drive handle itself.
    ///
    /// The key is resolved only after pending switches have settled, from
    /// the cache when warm and from settings otherwise.
    pub async fn ensure_drive(&self) -> Result<DriveHandle> {
        let (requested, handle) = self
            .lifecycle
            .ensure_resolved(|| self.current_key(), EnsureOptions::local())
            .await?;

        if requested.as_ref() != Some(&handle.key) {
            match self.persist_key(&handle.key) {
                Ok(()) => info!("Persisted drive key {}", handle.key.short()),
                Err(e) => warn!("Failed to persist drive key: {}", e),
            }
            self.set_cache(Some(handle.key.clone()));
        }
        Ok(handle)
    }

    /// Link text for the active vault, creating the vault if needed.
    pub async fn create_vault_link(&self) -> Result<String> {
        let key = self.ensure_vault_config().await?;
        create_link_string(Some(&key))
    }

    /// Validate `link`, persist its key and schedule the switch.
    ///
    /// Runs synchronously so concurrent joins are ordered by call order.
    ///
    /// # Errors
    /// - `Error::Validation` for a malformed link; nothing is changed
    /// - Settings write failures; nothing is changed
    pub fn begin_join(&self, link: &str) -> Result<PendingJoin> {
        let drive_key = VaultLink::parse(link)?.into_drive_key();

        let previous_setting = match self.settings.get(DRIVE_KEY_SETTING) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read stored drive key: {}", e);
                None
            }
        };
        let previous_cache = self.cache();
        let previous_key = previous_cache.clone().or_else(|| self.stored_key());

        self.persist_key(&drive_key)?;
        self.set_cache(Some(drive_key.clone()));
        info!("Joining vault {}", drive_key.short());

        let settings = self.settings.clone();
        let cached_key = self.cached_key.clone();
        let switch =
            self.lifecycle
                .schedule_switch_with_rollback(drive_key.clone(), false, move || {
                    let restored = match &previous_setting {
                        Some(raw) => settings.set(DRIVE_KEY_SETTING, raw),
                        None => settings.remove(DRIVE_KEY_SETTING),
                    };
                    if let Err(e) = restored {
                        warn!("Failed to restore drive key setting: {}", e);
                    }
                    *cached_key.write().unwrap_or_else(|e| e.into_inner()) = previous_cache;
                });
        Ok(PendingJoin {
            drive_key,
            previous_key,
            switch,
        })
    }

    /// Wait for a scheduled join to finish.
    ///
    /// On failure the persisted setting and the cache have already been
    /// restored, inside the switch chain, to exactly what they were before
    /// `begin_join`. On success both keys are recorded as recent and
    /// replication starts in the background.
    pub async fn finish_join(&self, pending: PendingJoin) -> Result<JoinedVault> {
        let PendingJoin {
            drive_key,
            previous_key,
            switch,
        } = pending;

        if let Err(e) = switch.wait().await {
            warn!("Join of {} failed, restored previous vault", drive_key.short());
            return Err(e);
        }

        if let Some(previous) = &previous_key {
            self.add_recent_vault(previous.as_str(), None);
        }
        self.add_recent_vault(drive_key.as_str(), None);

        self.lifecycle.replicate(drive_key.clone());
        info!("Joined vault {}", drive_key.short());

        Ok(JoinedVault {
            drive_key,
            previous_key,
        })
    }

    /// Switch to the vault named by `link` and wait for the result.
    pub async fn apply_link_string(&self, link: &str) -> Result<JoinedVault> {
        let pending = self.begin_join(link)?;
        self.finish_join(pending).await
    }

    /// Remembered vaults, newest first. Malformed entries are skipped.
    pub fn recent_vaults(&self) -> Vec<RecentVault> {
        let raw = match self.settings.get(RECENT_VAULTS_SETTING) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read recent vaults: {}", e);
                return Vec::new();
            }
        };

        let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Ignoring unreadable recent vaults list: {}", e);
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter_map(|value| serde_json::from_value::<RecentVault>(value).ok())
            .map(|mut vault| {
                vault.label = normalize_label(vault.label.as_deref());
                vault
            })
            .take(RECENT_VAULT_LIMIT)
            .collect()
    }

    /// Move `drive_key` to the front of the recent list.
    ///
    /// A non-empty `label` replaces the stored one; otherwise an existing
    /// label is kept. Invalid keys are ignored. Returns the updated list.
    pub fn add_recent_vault(&self, drive_key: &str, label: Option<&str>) -> Vec<RecentVault> {
        let mut vaults = self.recent_vaults();
        let Ok(key) = DriveKey::parse(drive_key.trim()) else {
            debug!("Not recording invalid drive key as recent");
            return vaults;
        };

        let position = vaults.iter().position(|v| v.drive_key == key);
        let existing = position.map(|pos| vaults.remove(pos));
        let label = normalize_label(label).or_else(|| existing.and_then(|v| v.label));

        vaults.insert(
            0,
            RecentVault {
                drive_key: key,
                label,
            },
        );
        vaults.truncate(RECENT_VAULT_LIMIT);

        match serde_json::to_string(&vaults) {
            Ok(json) => {
                if let Err(e) = self.settings.set(RECENT_VAULTS_SETTING, &json) {
                    warn!("Failed to save recent vaults: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode recent vaults: {}", e),
        }
        vaults
    }
}

fn normalize_label(label: Option<&str>) -> Option<String> {
    label
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}
