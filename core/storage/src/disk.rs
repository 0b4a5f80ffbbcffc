//! Disk-backed drive store for a single device.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/LOCK                    owner pid, held while the store is open;
//!                                taken over once that process is gone
//! <root>/drives/<key>/files/...  drive content
//! ```
//!
//! Disk drives do not replicate on their own; `replicate` only records
//! the connection. Remote catch-up (`update`) completes immediately.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, ProcessStatus, System};
use tracing::{debug, info, warn};

use crate::drive::{Drive, DriveEntry, DriveStore, FindingPeers, PeerConnection};
use crate::local::LocalFolder;
use pearl_common::{DriveKey, DrivePath, Error, Result};

const LOCK_FILENAME: &str = "LOCK";
const DRIVES_DIRNAME: &str = "drives";
const FILES_DIRNAME: &str = "files";

/// Drive stored in a local directory.
pub struct DiskDrive {
    key: DriveKey,
    discovery_key: [u8; 32],
    folder: LocalFolder,
}

impl DiskDrive {
    pub fn root(&self) -> &Path {
        self.folder.root()
    }
}

#[async_trait]
impl Drive for DiskDrive {
    fn key(&self) -> &DriveKey {
        &self.key
    }

    fn discovery_key(&self) -> [u8; 32] {
        self.discovery_key
    }

    async fn ready(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.folder.root()).await?;
        Ok(())
    }

    async fn get(&self, path: &DrivePath) -> Result<Option<Vec<u8>>> {
        self.folder.read(path).await
    }

    async fn put(&self, path: &DrivePath, data: Vec<u8>) -> Result<()> {
        self.folder.write(path, &data).await
    }

    async fn del(&self, path: &DrivePath) -> Result<()> {
        self.folder.remove(path).await
    }

    async fn entry(&self, path: &DrivePath) -> Result<Option<DriveEntry>> {
        self.folder.entry(path).await
    }

    async fn list(&self, dir: &DrivePath, recursive: bool) -> Result<Vec<DriveEntry>> {
        self.folder.list(dir, recursive).await
    }

    async fn download(&self, path: &DrivePath) -> Result<()> {
        match self.folder.entry(path).await? {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    async fn update(&self) -> Result<bool> {
        Ok(false)
    }

    fn finding_peers(&self) -> FindingPeers {
        FindingPeers::noop()
    }
}

/// Drive store rooted at a local directory.
///
/// Only one process may hold a root at a time; a second `ready` on the
/// same root fails with `Error::Locked` until the first store closes.
pub struct DiskDriveStore {
    root: PathBuf,
    lock_held: Mutex<bool>,
}

impl DiskDriveStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            lock_held: Mutex::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILENAME)
    }

    fn drive_dir(&self, key: &DriveKey) -> PathBuf {
        self.root
            .join(DRIVES_DIRNAME)
            .join(key.as_str())
            .join(FILES_DIRNAME)
    }

    /// Take the storage lock.
    ///
    /// A LOCK file is honoured only while the process named in it is
    /// running. Locks left behind by a dead process, or with unreadable
    /// contents, are taken over.
    fn acquire_lock(&self) -> Result<()> {
        let mut held = self.lock_held.lock().unwrap_or_else(|e| e.into_inner());
        if *held {
            return Ok(());
        }
        std::fs::create_dir_all(&self.root)?;

        let mut file = match self.create_lock_file() {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match read_lock_pid(&self.lock_path()) {
                    Some(pid) if process_is_running(pid) => {
                        return Err(Error::Locked(format!(
                            "{} is in use (owner pid {})",
                            self.root.display(),
                            pid
                        )));
                    }
                    owner => {
                        warn!(
                            "Taking over stale storage lock at {} (owner {:?})",
                            self.root.display(),
                            owner
                        );
                        match std::fs::remove_file(self.lock_path()) {
                            Ok(()) => {}
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => return Err(e.into()),
                        }
                        self.create_lock_file().map_err(|e| {
                            if e.kind() == std::io::ErrorKind::AlreadyExists {
                                Error::Locked(format!(
                                    "{} was locked by another process",
                                    self.root.display()
                                ))
                            } else {
                                e.into()
                            }
                        })?
                    }
                }
            }
            Err(e) => return Err(e.into()),
        };
        write!(file, "{}", std::process::id())?;
        *held = true;
        debug!("Acquired storage lock at {}", self.root.display());
        Ok(())
    }

    fn create_lock_file(&self) -> std::io::Result<std::fs::File> {
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path())
    }

    fn release_lock(&self) -> Result<()> {
        let mut held = self.lock_held.lock().unwrap_or_else(|e| e.into_inner());
        if !*held {
            return Ok(());
        }
        match std::fs::remove_file(self.lock_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *held = false;
        Ok(())
    }
}

/// Owner pid recorded in a LOCK file; `None` if missing or corrupt.
fn read_lock_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_is_running(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return false;
    }
    system
        .process(pid)
        .map(|process| !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

impl Drop for DiskDriveStore {
    fn drop(&mut self) {
        if let Err(e) = self.release_lock() {
            warn!("Failed to release storage lock: {}", e);
        }
    }
}

#[async_trait]
impl DriveStore for DiskDriveStore {
    fn name(&self) -> &str {
        "disk"
    }

    async fn ready(&self) -> Result<()> {
        self.acquire_lock()
    }

    async fn open_drive(&self, key: Option<&DriveKey>) -> Result<Arc<dyn Drive>> {
        let key = match key {
            Some(key) => key.clone(),
            None => {
                let key = pearl_crypto::generate_drive_key();
                info!("Allocated new drive {}", key.short());
                key
            }
        };
        let discovery_key = pearl_crypto::discovery_key(&key)?;
        let dir = self.drive_dir(&key);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Drive(format!("Cannot create drive {}: {}", key.short(), e)))?;

        Ok(Arc::new(DiskDrive {
            key,
            discovery_key,
            folder: LocalFolder::new(dir),
        }))
    }

    fn replicate(&self, connection: &PeerConnection) {
        debug!(
            "Disk store has no replication transport; ignoring connection {} from {}",
            connection.id, connection.remote
        );
    }

    async fn close(&self) -> Result<()> {
        self.release_lock()
    }
}
