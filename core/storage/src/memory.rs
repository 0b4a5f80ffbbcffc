//! In-memory drive backend for testing and demos.
//!
//! Stores opened on the same [`MemoryNetwork`] see each other's drives
//! immediately, which stands in for replication between devices.
//! [`MemorySwarm`] simulates peer connections and slow discovery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::drive::{
    Discovery, Drive, DriveEntry, DriveStore, FindingPeers, JoinOptions, PeerConnection, Swarm,
    SwarmEvent, SwarmFactory,
};
use pearl_common::{DriveKey, DrivePath, Error, Result};

/// Stored file content.
#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

/// Content shared by every replica of one drive.
#[derive(Debug, Default)]
struct DriveContent {
    files: RwLock<BTreeMap<DrivePath, StoredFile>>,
}

/// A set of in-memory replicas that share drive content by key.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    drives: Arc<Mutex<HashMap<DriveKey, Arc<DriveContent>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn content(&self, key: &DriveKey) -> Arc<DriveContent> {
        let mut drives = self.drives.lock().unwrap_or_else(|e| e.into_inner());
        drives.entry(key.clone()).or_default().clone()
    }

    /// Whether any replica has opened `key`.
    pub fn knows(&self, key: &DriveKey) -> bool {
        let drives = self.drives.lock().unwrap_or_else(|e| e.into_inner());
        drives.contains_key(key)
    }
}

/// In-memory replica of one drive.
pub struct MemoryDrive {
    key: DriveKey,
    discovery_key: [u8; 32],
    content: Arc<DriveContent>,
    finding_peers: Arc<AtomicUsize>,
    update_delay: Duration,
}

impl MemoryDrive {
    fn entry_for(path: &DrivePath, file: &StoredFile) -> DriveEntry {
        DriveEntry {
            path: path.clone(),
            size: file.data.len() as u64,
            modified: file.modified,
        }
    }

    /// Number of outstanding [`FindingPeers`] guards.
    pub fn finding_peers_count(&self) -> usize {
        self.finding_peers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Drive for MemoryDrive {
    fn key(&self) -> &DriveKey {
        &self.key
    }

    fn discovery_key(&self) -> [u8; 32] {
        self.discovery_key
    }

    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, path: &DrivePath) -> Result<Option<Vec<u8>>> {
        let files = self.content.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files.get(path).map(|f| f.data.clone()))
    }

    async fn put(&self, path: &DrivePath, data: Vec<u8>) -> Result<()> {
        if path.is_root() {
            return Err(Error::Validation("Cannot write to the drive root".to_string()));
        }
        let mut files = self.content.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(
            path.clone(),
            StoredFile {
                data,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn del(&self, path: &DrivePath) -> Result<()> {
        let mut files = self.content.files.write().unwrap_or_else(|e| e.into_inner());
        match files.remove(path) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    async fn entry(&self, path: &DrivePath) -> Result<Option<DriveEntry>> {
        let files = self.content.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files.get(path).map(|f| Self::entry_for(path, f)))
    }

    async fn list(&self, dir: &DrivePath, recursive: bool) -> Result<Vec<DriveEntry>> {
        let files = self.content.files.read().unwrap_or_else(|e| e.into_inner());
        let results = files
            .iter()
            .filter(|(path, _)| match path.strip_prefix(dir) {
                Some(rest) => rest.len() == 1 || (recursive && rest.len() > 1),
                None => false,
            })
            .map(|(path, file)| Self::entry_for(path, file))
            .collect();
        Ok(results)
    }

    async fn download(&self, path: &DrivePath) -> Result<()> {
        let files = self.content.files.read().unwrap_or_else(|e| e.into_inner());
        if files.contains_key(path) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("File not found: {}", path)))
        }
    }

    async fn update(&self) -> Result<bool> {
        if !self.update_delay.is_zero() {
            tokio::time::sleep(self.update_delay).await;
        }
        Ok(false)
    }

    fn finding_peers(&self) -> FindingPeers {
        self.finding_peers.fetch_add(1, Ordering::SeqCst);
        let counter = self.finding_peers.clone();
        FindingPeers::new(move || {
            counter.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

/// Tunable behaviour of a [`MemoryDriveStore`].
#[derive(Debug, Clone, Default)]
struct StoreKnobs {
    open_delay: Duration,
    update_delay: Duration,
}

/// In-memory drive store.
///
/// Useful for testing and development. Knobs simulate locked storage,
/// failing drive opens and slow local or remote readiness.
pub struct MemoryDriveStore {
    network: MemoryNetwork,
    knobs: Mutex<StoreKnobs>,
    locked: AtomicBool,
    fail_opens: AtomicBool,
    opens: AtomicUsize,
    allocations: AtomicUsize,
    replicated: Mutex<Vec<PeerConnection>>,
    closed: AtomicBool,
}

impl MemoryDriveStore {
    /// Create a store on a private network.
    pub fn new() -> Self {
        Self::on_network(MemoryNetwork::new())
    }

    /// Create a store whose drives are shared with other stores on `network`.
    pub fn on_network(network: MemoryNetwork) -> Self {
        Self {
            network,
            knobs: Mutex::new(StoreKnobs::default()),
            locked: AtomicBool::new(false),
            fail_opens: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
            replicated: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    /// Make `ready` fail with `Error::Locked`.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    /// Make `open_drive` fail.
    pub fn set_fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }

    /// Delay every `open_drive` call.
    pub fn set_open_delay(&self, delay: Duration) {
        self.knobs.lock().unwrap_or_else(|e| e.into_inner()).open_delay = delay;
    }

    /// Delay `update` on drives opened from now on.
    pub fn set_update_delay(&self, delay: Duration) {
        self.knobs.lock().unwrap_or_else(|e| e.into_inner()).update_delay = delay;
    }

    /// Total `open_drive` calls.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// `open_drive` calls that allocated a brand-new drive.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Connections handed to `replicate`.
    pub fn replicated_connections(&self) -> Vec<PeerConnection> {
        self.replicated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for MemoryDriveStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriveStore for MemoryDriveStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ready(&self) -> Result<()> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(Error::Locked(
                "memory store is held by another instance".to_string(),
            ));
        }
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn open_drive(&self, key: Option<&DriveKey>) -> Result<Arc<dyn Drive>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let knobs = self.knobs.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if !knobs.open_delay.is_zero() {
            tokio::time::sleep(knobs.open_delay).await;
        }
        if self.fail_opens.load(Ordering::SeqCst) {
            return Err(Error::Drive("simulated drive open failure".to_string()));
        }

        let key = match key {
            Some(key) => key.clone(),
            None => {
                self.allocations.fetch_add(1, Ordering::SeqCst);
                pearl_crypto::generate_drive_key()
            }
        };
        let discovery_key = pearl_crypto::discovery_key(&key)?;

        Ok(Arc::new(MemoryDrive {
            content: self.network.content(&key),
            key,
            discovery_key,
            finding_peers: Arc::new(AtomicUsize::new(0)),
            update_delay: knobs.update_delay,
        }))
    }

    fn replicate(&self, connection: &PeerConnection) {
        self.replicated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(connection.clone());
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Topic bookkeeping shared between a swarm and its discoveries.
#[derive(Debug, Default)]
struct TopicTable {
    active: Mutex<Vec<[u8; 32]>>,
}

impl TopicTable {
    fn remove(&self, topic: &[u8; 32]) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = active.iter().position(|t| t == topic) {
            active.remove(pos);
        }
    }
}

struct MemoryDiscovery {
    topic: [u8; 32],
    topics: Arc<TopicTable>,
    flush_delay: Duration,
}

#[async_trait]
impl Discovery for MemoryDiscovery {
    fn topic(&self) -> [u8; 32] {
        self.topic
    }

    async fn flushed(&self) -> Result<()> {
        if !self.flush_delay.is_zero() {
            tokio::time::sleep(self.flush_delay).await;
        }
        Ok(())
    }

    fn destroy(&self) {
        self.topics.remove(&self.topic);
    }
}

/// In-process swarm with scripted peers.
pub struct MemorySwarm {
    events: broadcast::Sender<SwarmEvent>,
    topics: Arc<TopicTable>,
    joins: AtomicUsize,
    flush_delay: Mutex<Duration>,
    next_connection: AtomicU64,
    destroyed: AtomicBool,
}

impl MemorySwarm {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            topics: Arc::new(TopicTable::default()),
            joins: AtomicUsize::new(0),
            flush_delay: Mutex::new(Duration::ZERO),
            next_connection: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Factory that always hands out this swarm.
    pub fn factory(self: &Arc<Self>) -> SwarmFactory {
        let swarm = self.clone();
        Arc::new(move || Ok(swarm.clone() as Arc<dyn Swarm>))
    }

    /// Delay `flush` and `Discovery::flushed`.
    pub fn set_flush_delay(&self, delay: Duration) {
        *self.flush_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    fn flush_delay(&self) -> Duration {
        *self.flush_delay.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulate an incoming peer connection.
    pub fn connect_peer(&self, remote: impl Into<String>) -> PeerConnection {
        let connection = PeerConnection {
            id: self.next_connection.fetch_add(1, Ordering::SeqCst),
            remote: remote.into(),
        };
        let _ = self.events.send(SwarmEvent::Connected(connection.clone()));
        connection
    }

    /// Simulate a dropped connection.
    pub fn disconnect_peer(&self, connection: &PeerConnection) {
        let _ = self
            .events
            .send(SwarmEvent::Disconnected(connection.clone()));
    }

    /// Total `join` calls.
    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    /// Topics joined and not yet destroyed.
    pub fn active_topics(&self) -> Vec<[u8; 32]> {
        self.topics
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Default for MemorySwarm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Swarm for MemorySwarm {
    fn join(&self, topic: [u8; 32], _options: JoinOptions) -> Result<Box<dyn Discovery>> {
        if self.is_destroyed() {
            return Err(Error::Storage("swarm has been destroyed".to_string()));
        }
        self.joins.fetch_add(1, Ordering::SeqCst);
        self.topics
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(topic);
        Ok(Box::new(MemoryDiscovery {
            topic,
            topics: self.topics.clone(),
            flush_delay: self.flush_delay(),
        }))
    }

    async fn flush(&self) -> Result<()> {
        let delay = self.flush_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    async fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        self.topics
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }
}
