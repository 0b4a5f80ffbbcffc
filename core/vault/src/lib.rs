//! Vault identity and drive lifecycle for Pearl.
//!
//! This module provides:
//! - The drive session that owns the one live drive handle
//! - Serialized switching between vaults
//! - Vault links and the persisted active-vault identity
//! - Small key-value settings storage
//!
//! # Architecture
//! Everything that touches the drive goes through the
//! [`DriveLifecycleManager`], which orders switches and holds `ensure`
//! calls back until a pending switch has settled.

pub mod identity;
pub mod lifecycle;
pub mod link;
pub mod session;
pub mod settings;

pub use identity::{
    JoinedVault, PendingJoin, RecentVault, VaultIdentity, DRIVE_KEY_SETTING, RECENT_VAULTS_SETTING,
    RECENT_VAULT_LIMIT,
};
pub use lifecycle::{DriveActivity, DriveActivityKind, DriveLifecycleManager, SwitchTicket};
pub use link::{create_link_string, VaultLink, LINK_SCHEME};
pub use session::{DriveEnsurer, DriveHandle, DriveSession, EnsureOptions};
pub use settings::{JsonFileStore, KeyValueStore, MemoryKeyValueStore};
