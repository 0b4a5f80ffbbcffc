//! Drive session management.
//!
//! A session owns the single local handle to the active vault's drive and
//! the process-wide peer swarm. Network waits are bounded and degrade to
//! "proceed anyway"; only failures to open the drive itself propagate.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pearl_common::{with_deadline, Deadline, DriveKey, Result, Timeouts};
use pearl_storage::{Discovery, Drive, DriveStore, JoinOptions, Swarm, SwarmEvent, SwarmFactory};

/// What `ensure` should guarantee before returning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnsureOptions {
    /// Drive to open. `None` keeps the current drive, or allocates one.
    pub key: Option<DriveKey>,
    /// Rebuild the handle even if it already points at `key`.
    pub force: bool,
    /// Join peer discovery and wait (bounded) for remote state.
    pub replicate: bool,
}

impl EnsureOptions {
    /// Local readiness only.
    pub fn local() -> Self {
        Self::default()
    }

    /// Local readiness plus peer discovery and remote catch-up.
    pub fn replicated() -> Self {
        Self {
            replicate: true,
            ..Self::default()
        }
    }

    /// Forced rebuild onto `key`, local readiness only.
    pub fn switch_to(key: DriveKey) -> Self {
        Self {
            key: Some(key),
            force: true,
            replicate: false,
        }
    }

    pub fn with_key(mut self, key: Option<DriveKey>) -> Self {
        self.key = key;
        self
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Result of a successful `ensure`.
#[derive(Clone)]
pub struct DriveHandle {
    pub drive: Arc<dyn Drive>,
    pub key: DriveKey,
    /// Approximate live connection count at the time of the call.
    pub peer_count: usize,
}

impl fmt::Debug for DriveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveHandle")
            .field("key", &self.key)
            .field("peer_count", &self.peer_count)
            .finish()
    }
}

/// Anything that can hand out the active drive.
///
/// Implemented by [`DriveSession`]; tests substitute their own.
#[async_trait]
pub trait DriveEnsurer: Send + Sync {
    async fn ensure(&self, options: EnsureOptions) -> Result<DriveHandle>;
}

struct ActiveDrive {
    id: Uuid,
    key: DriveKey,
    drive: Arc<dyn Drive>,
}

#[derive(Default)]
struct Replication {
    discovery: Option<Box<dyn Discovery>>,
    joined_topic: Option<[u8; 32]>,
}

#[derive(Default)]
struct SwarmSlot {
    swarm: Option<Arc<dyn Swarm>>,
    peer_task: Option<JoinHandle<()>>,
}

/// The one live drive handle for this process.
pub struct DriveSession {
    store: Arc<dyn DriveStore>,
    store_open: Mutex<bool>,
    swarm_factory: SwarmFactory,
    swarm: Mutex<SwarmSlot>,
    active: Mutex<Option<ActiveDrive>>,
    replication: Mutex<Replication>,
    peer_count: Arc<AtomicUsize>,
    timeouts: Timeouts,
}

impl DriveSession {
    pub fn new(store: Arc<dyn DriveStore>, swarm_factory: SwarmFactory, timeouts: Timeouts) -> Self {
        Self {
            store,
            store_open: Mutex::new(false),
            swarm_factory,
            swarm: Mutex::new(SwarmSlot::default()),
            active: Mutex::new(None),
            replication: Mutex::new(Replication::default()),
            peer_count: Arc::new(AtomicUsize::new(0)),
            timeouts,
        }
    }

    pub fn store(&self) -> &Arc<dyn DriveStore> {
        &self.store
    }

    /// Approximate connection count: incremented on connect, decremented
    /// on disconnect, never deduplicated by peer.
    pub fn peer_count(&self) -> usize {
        self.peer_count.load(Ordering::SeqCst)
    }

    /// Key of the current drive, if one is open.
    pub async fn current_key(&self) -> Option<DriveKey> {
        self.active.lock().await.as_ref().map(|a| a.key.clone())
    }

    /// Create or reuse the drive handle.
    ///
    /// # Postconditions
    /// - The handle is rebuilt if `force`, if none exists, or if a key is
    ///   requested that differs from the current one
    /// - With `replicate`, the drive has joined peer discovery and had a
    ///   bounded chance to catch up with remote state
    ///
    /// # Errors
    /// - `Error::Locked` if the store is held by another process
    /// - Drive open failures; network waits never fail the call
    pub async fn ensure(&self, options: EnsureOptions) -> Result<DriveHandle> {
        self.open_store().await?;
        let (drive, key, rebuilt) = self.select_drive(&options).await?;

        if options.replicate {
            self.join_discovery(&drive).await;
            if rebuilt {
                self.find_initial_peers(&drive).await;
            }
            self.catch_up(&drive).await;
        }

        Ok(DriveHandle {
            drive,
            key,
            peer_count: self.peer_count(),
        })
    }

    async fn open_store(&self) -> Result<()> {
        let mut open = self.store_open.lock().await;
        if !*open {
            self.store.ready().await?;
            debug!("Drive store '{}' ready", self.store.name());
            *open = true;
        }
        Ok(())
    }

    async fn select_drive(
        &self,
        options: &EnsureOptions,
    ) -> Result<(Arc<dyn Drive>, DriveKey, bool)> {
        let mut active = self.active.lock().await;

        if !options.force {
            if let Some(current) = active.as_ref() {
                let same_key = options.key.as_ref().map_or(true, |k| *k == current.key);
                if same_key {
                    return Ok((current.drive.clone(), current.key.clone(), false));
                }
            }
        }

        let drive = self.store.open_drive(options.key.as_ref()).await?;
        drive.ready().await?;
        let key = drive.key().clone();
        let id = Uuid::new_v4();
        info!(session = %id, "Opened drive {}", key.short());

        *active = Some(ActiveDrive {
            id,
            key: key.clone(),
            drive: drive.clone(),
        });
        self.replication.lock().await.joined_topic = None;

        Ok((drive, key, true))
    }

    async fn swarm(&self) -> Result<Arc<dyn Swarm>> {
        let mut slot = self.swarm.lock().await;
        if let Some(swarm) = slot.swarm.as_ref() {
            return Ok(swarm.clone());
        }

        let swarm = (self.swarm_factory)()?;
        slot.peer_task = Some(self.spawn_peer_counter(swarm.subscribe()));
        slot.swarm = Some(swarm.clone());
        debug!("Peer swarm created");
        Ok(swarm)
    }

    fn spawn_peer_counter(&self, mut events: broadcast::Receiver<SwarmEvent>) -> JoinHandle<()> {
        let store = self.store.clone();
        let peer_count = self.peer_count.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SwarmEvent::Connected(connection)) => {
                        store.replicate(&connection);
                        let count = peer_count.fetch_add(1, Ordering::SeqCst) + 1;
                        debug!("Peer connected ({} connections)", count);
                    }
                    Ok(SwarmEvent::Disconnected(_)) => {
                        let _ = peer_count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                            Some(n.saturating_sub(1))
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Missed {} swarm events; peer count may drift", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Join the drive's discovery topic unless already joined.
    async fn join_discovery(&self, drive: &Arc<dyn Drive>) {
        let swarm = match self.swarm().await {
            Ok(swarm) => swarm,
            Err(e) => {
                warn!("Peer swarm unavailable, continuing offline: {}", e);
                return;
            }
        };

        let topic = drive.discovery_key();
        let mut replication = self.replication.lock().await;
        if replication.joined_topic == Some(topic) {
            return;
        }

        if let Some(previous) = replication.discovery.take() {
            previous.destroy();
        }

        let discovery = match swarm.join(topic, JoinOptions::default()) {
            Ok(discovery) => discovery,
            Err(e) => {
                warn!("Failed to join discovery for {}: {}", drive.key().short(), e);
                return;
            }
        };

        match with_deadline(self.timeouts.discovery_flush, discovery.flushed()).await {
            Deadline::Completed(Ok(())) => debug!("Discovery flushed for {}", drive.key().short()),
            Deadline::Completed(Err(e)) => warn!("Discovery flush failed: {}", e),
            Deadline::TimedOut => warn!(
                "Discovery flush timed out after {:?}; continuing",
                self.timeouts.discovery_flush
            ),
        }

        replication.discovery = Some(discovery);
        replication.joined_topic = Some(topic);
    }

    /// Signal an active peer search on a fresh drive and give it a bounded
    /// window before declaring it done.
    async fn find_initial_peers(&self, drive: &Arc<dyn Drive>) {
        info!("New drive opened, waiting for peer discovery...");
        let finding = drive.finding_peers();

        let swarm = self.swarm.lock().await.swarm.clone();
        if let Some(swarm) = swarm {
            match with_deadline(self.timeouts.peer_discovery, swarm.flush()).await {
                Deadline::Completed(Ok(())) => {}
                Deadline::Completed(Err(e)) => warn!("Peer discovery failed: {}", e),
                Deadline::TimedOut => warn!(
                    "Peer discovery timed out after {:?}",
                    self.timeouts.peer_discovery
                ),
            }
        }

        drop(finding);
        info!("Peer finding complete");
    }

    /// Bounded wait for remote state; not a full sync.
    async fn catch_up(&self, drive: &Arc<dyn Drive>) {
        debug!("Ensuring drive {} is synchronized...", drive.key().short());
        match with_deadline(self.timeouts.remote_update, drive.update()).await {
            Deadline::Completed(Ok(changed)) => {
                debug!("Drive synchronization complete (changed: {})", changed)
            }
            Deadline::Completed(Err(e)) => warn!("Drive synchronization error: {}", e),
            Deadline::TimedOut => warn!(
                "Drive synchronization timed out after {:?}; continuing",
                self.timeouts.remote_update
            ),
        }
    }

    /// Tear everything down: leave discovery, destroy the swarm, drop the
    /// drive and close the store. A later `ensure` starts from scratch.
    pub async fn dispose(&self) -> Result<()> {
        {
            let mut replication = self.replication.lock().await;
            if let Some(discovery) = replication.discovery.take() {
                discovery.destroy();
            }
            replication.joined_topic = None;
        }

        let slot = std::mem::take(&mut *self.swarm.lock().await);
        if let Some(task) = slot.peer_task {
            task.abort();
        }
        if let Some(swarm) = slot.swarm {
            if let Err(e) = swarm.destroy().await {
                warn!("Failed to destroy peer swarm: {}", e);
            }
        }
        self.peer_count.store(0, Ordering::SeqCst);

        if let Some(active) = self.active.lock().await.take() {
            debug!(session = %active.id, "Dropped drive {}", active.key.short());
        }

        let mut open = self.store_open.lock().await;
        if *open {
            self.store.close().await?;
            *open = false;
        }
        info!("Drive session disposed");
        Ok(())
    }
}

#[async_trait]
impl DriveEnsurer for DriveSession {
    async fn ensure(&self, options: EnsureOptions) -> Result<DriveHandle> {
        DriveSession::ensure(self, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pearl_storage::{MemoryDriveStore, MemorySwarm};
    use std::time::Duration;

    fn fixture() -> (Arc<MemoryDriveStore>, Arc<MemorySwarm>, DriveSession) {
        let store = Arc::new(MemoryDriveStore::new());
        let swarm = Arc::new(MemorySwarm::new());
        let session = DriveSession::new(store.clone(), swarm.factory(), Timeouts::default());
        (store, swarm, session)
    }

    #[tokio::test]
    async fn test_ensure_allocates_once_and_reuses() {
        let (store, _swarm, session) = fixture();

        let first = session.ensure(EnsureOptions::local()).await.unwrap();
        let second = session.ensure(EnsureOptions::local()).await.unwrap();
        let third = session
            .ensure(EnsureOptions::local().with_key(Some(first.key.clone())))
            .await
            .unwrap();

        assert_eq!(first.key, second.key);
        assert_eq!(first.key, third.key);
        assert_eq!(store.allocations(), 1);
        assert_eq!(store.opens(), 1);
    }

    #[tokio::test]
    async fn test_ensure_rebuilds_on_new_key_or_force() {
        let (store, _swarm, session) = fixture();
        let first = session.ensure(EnsureOptions::local()).await.unwrap();

        let other = DriveKey::parse(&"b".repeat(64)).unwrap();
        let switched = session
            .ensure(EnsureOptions::local().with_key(Some(other.clone())))
            .await
            .unwrap();
        assert_eq!(switched.key, other);
        assert_eq!(session.current_key().await, Some(other.clone()));

        session.ensure(EnsureOptions::switch_to(other)).await.unwrap();
        assert_eq!(store.opens(), 3);
        assert_ne!(first.key, switched.key);
    }

    #[tokio::test]
    async fn test_failed_open_keeps_current_drive() {
        let (store, _swarm, session) = fixture();
        let first = session.ensure(EnsureOptions::local()).await.unwrap();

        store.set_fail_opens(true);
        let other = DriveKey::parse(&"c".repeat(64)).unwrap();
        assert!(session.ensure(EnsureOptions::switch_to(other)).await.is_err());
        assert_eq!(session.current_key().await, Some(first.key));
    }

    #[tokio::test]
    async fn test_locked_store_propagates() {
        let (store, _swarm, session) = fixture();
        store.set_locked(true);
        let err = session.ensure(EnsureOptions::local()).await.unwrap_err();
        assert!(err.is_locked());
    }

    #[tokio::test]
    async fn test_replication_joins_topic_once() {
        let (_store, swarm, session) = fixture();

        let handle = session.ensure(EnsureOptions::replicated()).await.unwrap();
        session.ensure(EnsureOptions::replicated()).await.unwrap();

        assert_eq!(swarm.join_count(), 1);
        assert_eq!(swarm.active_topics(), vec![handle.drive.discovery_key()]);
    }

    #[tokio::test]
    async fn test_switch_rejoins_and_leaves_old_topic() {
        let (_store, swarm, session) = fixture();
        session.ensure(EnsureOptions::replicated()).await.unwrap();

        let other = DriveKey::parse(&"d".repeat(64)).unwrap();
        let handle = session
            .ensure(EnsureOptions::switch_to(other))
            .await
            .unwrap();
        // Local-only switch does not touch discovery.
        assert_eq!(swarm.join_count(), 1);

        session
            .ensure(EnsureOptions::replicated().with_key(Some(handle.key.clone())))
            .await
            .unwrap();
        assert_eq!(swarm.join_count(), 2);
        assert_eq!(swarm.active_topics(), vec![handle.drive.discovery_key()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_network_degrades_instead_of_failing() {
        let (store, swarm, session) = fixture();
        swarm.set_flush_delay(Duration::from_secs(60));
        store.set_update_delay(Duration::from_secs(60));

        let started = tokio::time::Instant::now();
        let handle = session.ensure(EnsureOptions::replicated()).await;
        assert!(handle.is_ok());
        // discovery flush (5s) + peer discovery (5s) + remote update (10s)
        assert!(started.elapsed() <= Duration::from_secs(21));
    }

    #[tokio::test]
    async fn test_peer_count_tracks_connections() {
        let (store, swarm, session) = fixture();
        session.ensure(EnsureOptions::replicated()).await.unwrap();

        let a = swarm.connect_peer("a");
        let _b = swarm.connect_peer("b");
        swarm.disconnect_peer(&a);
        swarm.disconnect_peer(&a);
        swarm.disconnect_peer(&a);

        for _ in 0..50 {
            if store.replicated_connections().len() == 2 && session.peer_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.replicated_connections().len(), 2);
        assert_eq!(session.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_dispose_tears_down() {
        let (store, swarm, session) = fixture();
        session.ensure(EnsureOptions::replicated()).await.unwrap();

        session.dispose().await.unwrap();

        assert!(swarm.is_destroyed());
        assert!(store.is_closed());
        assert!(session.current_key().await.is_none());
    }
}
