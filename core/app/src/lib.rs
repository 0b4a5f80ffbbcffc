//! Application layer for Pearl.
//!
//! [`CoreFacade`] wires the drive session, vault identity, notes store and
//! sync coordinator together and exposes the operations a UI calls.
//! Join outcomes are delivered through [`VaultEvents`].

pub mod config;
pub mod events;
pub mod facade;

pub use config::{CoreConfig, NOTES_EXPORT_DIR_ENV, SETTINGS_FILENAME, STORAGE_PATH_ENV};
pub use events::{EventHandler, SubscriptionId, VaultEvent, VaultEventKind, VaultEvents};
pub use facade::{CoreFacade, JoinStatus, NoteInput, RecentVaultList, VaultLinkInfo};
