//! Replication control and status reporting for Pearl.
//!
//! [`SyncCoordinator`] starts or restarts replication of the active vault
//! and records the outcome on a shared [`SyncStatusBoard`].
//! [`StatusFacade`] combines that board with a bounded drive probe into a
//! status report that never fails.

pub mod coordinator;
pub mod state;
pub mod status;

pub use coordinator::SyncCoordinator;
pub use state::{SyncSnapshot, SyncStatusBoard, SyncUpdate};
pub use status::{StatusFacade, VaultStatus};
