//! Drive, store and swarm trait definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use pearl_common::{DriveKey, DrivePath, Result};

/// Metadata for a file stored in a drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveEntry {
    /// Absolute path inside the drive.
    pub path: DrivePath,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time as seen by this replica.
    pub modified: DateTime<Utc>,
}

/// Guard returned by [`Drive::finding_peers`].
///
/// While held, reads on the drive may wait for peers instead of failing
/// fast. Dropping it signals that the peer search is over.
pub struct FindingPeers {
    done: Option<Box<dyn FnOnce() + Send>>,
}

impl FindingPeers {
    pub fn new(done: impl FnOnce() + Send + 'static) -> Self {
        Self {
            done: Some(Box::new(done)),
        }
    }

    /// A guard with nothing to signal.
    pub fn noop() -> Self {
        Self { done: None }
    }
}

impl Drop for FindingPeers {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            done();
        }
    }
}

impl fmt::Debug for FindingPeers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindingPeers")
            .field("pending", &self.done.is_some())
            .finish()
    }
}

/// Handle to a replicated, content-addressed file tree.
///
/// Paths are flat: directories exist implicitly through their files.
#[async_trait]
pub trait Drive: Send + Sync {
    /// Public key identifying the drive.
    fn key(&self) -> &DriveKey;

    /// Topic peers use to find each other for this drive.
    fn discovery_key(&self) -> [u8; 32];

    /// Wait until the drive is usable locally.
    async fn ready(&self) -> Result<()>;

    /// Read a file; `Ok(None)` if it does not exist.
    async fn get(&self, path: &DrivePath) -> Result<Option<Vec<u8>>>;

    /// Create or replace a file.
    async fn put(&self, path: &DrivePath, data: Vec<u8>) -> Result<()>;

    /// Delete a file.
    ///
    /// # Errors
    /// - `Error::NotFound` if no file exists at `path`
    async fn del(&self, path: &DrivePath) -> Result<()>;

    /// Metadata for a file; `Ok(None)` if it does not exist.
    async fn entry(&self, path: &DrivePath) -> Result<Option<DriveEntry>>;

    /// Files under `dir`. Only direct children unless `recursive`.
    /// A directory with no files lists as empty.
    async fn list(&self, dir: &DrivePath, recursive: bool) -> Result<Vec<DriveEntry>>;

    /// Fetch a file's content from peers into local storage.
    ///
    /// # Errors
    /// - `Error::NotFound` if the file is unknown to every replica reached
    async fn download(&self, path: &DrivePath) -> Result<()>;

    /// Wait for the latest remote state. Returns whether anything changed.
    async fn update(&self) -> Result<bool>;

    /// Announce an active peer search; see [`FindingPeers`].
    fn finding_peers(&self) -> FindingPeers;
}

/// Owner of local drive storage (one per process).
#[async_trait]
pub trait DriveStore: Send + Sync {
    /// Backend name (e.g., "memory", "disk").
    fn name(&self) -> &str;

    /// Open the backing storage.
    ///
    /// # Errors
    /// - `Error::Locked` if another process holds the storage
    async fn ready(&self) -> Result<()>;

    /// Open an existing drive, or allocate a new one when `key` is `None`.
    async fn open_drive(&self, key: Option<&DriveKey>) -> Result<Arc<dyn Drive>>;

    /// Start replicating every open drive over `connection`.
    fn replicate(&self, connection: &PeerConnection);

    /// Release the backing storage.
    async fn close(&self) -> Result<()>;
}

/// A live connection to a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerConnection {
    /// Locally unique connection id.
    pub id: u64,
    /// Remote peer identifier.
    pub remote: String,
}

/// Connection lifecycle notifications from a swarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmEvent {
    Connected(PeerConnection),
    Disconnected(PeerConnection),
}

/// How to participate in a discovery topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOptions {
    /// Make ourselves findable.
    pub announce: bool,
    /// Look for others.
    pub lookup: bool,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            announce: true,
            lookup: true,
        }
    }
}

/// Membership in one discovery topic.
#[async_trait]
pub trait Discovery: Send + Sync {
    fn topic(&self) -> [u8; 32];

    /// Resolves once the topic has been announced to the network.
    async fn flushed(&self) -> Result<()>;

    /// Leave the topic.
    fn destroy(&self);
}

/// Peer-discovery and connection substrate.
#[async_trait]
pub trait Swarm: Send + Sync {
    /// Join a discovery topic.
    fn join(&self, topic: [u8; 32], options: JoinOptions) -> Result<Box<dyn Discovery>>;

    /// Resolves once pending discovery work has been processed.
    async fn flush(&self) -> Result<()>;

    /// Subscribe to connection events.
    fn subscribe(&self) -> broadcast::Receiver<SwarmEvent>;

    /// Leave every topic and drop all connections.
    async fn destroy(&self) -> Result<()>;
}

/// Creates the process-wide swarm on first use.
pub type SwarmFactory = Arc<dyn Fn() -> Result<Arc<dyn Swarm>> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_finding_peers_signals_on_drop() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let guard = FindingPeers::new(move || flag.store(true, Ordering::SeqCst));
        assert!(!done.load(Ordering::SeqCst));
        drop(guard);
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_entry_serialization() {
        let entry = DriveEntry {
            path: DrivePath::parse("/notes/a.md").unwrap(),
            size: 12,
            modified: Utc::now(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: DriveEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
