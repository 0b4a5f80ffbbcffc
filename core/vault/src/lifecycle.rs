//! Serialized drive lifecycle.
//!
//! Switches run strictly one after another in scheduling order. Every
//! `ensure` waits for the switch chain to settle first, so callers never
//! observe a half-switched drive. Background replication has its own chain
//! that also waits behind switches.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::{DriveEnsurer, DriveHandle, EnsureOptions};
use pearl_common::{DriveKey, Error, Result};

type Tail = Shared<BoxFuture<'static, ()>>;
type Rollback = Box<dyn FnOnce() + Send>;

fn settled_tail() -> Tail {
    futures::future::ready(()).boxed().shared()
}

/// Tail that resolves when `done` is sent or dropped.
fn tail_from(done: oneshot::Receiver<()>) -> Tail {
    done.map(|_| ()).boxed().shared()
}

/// Kind of lifecycle work currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveActivityKind {
    Idle,
    Switch,
    Ensure,
    Replicate,
}

/// Snapshot of lifecycle work, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveActivity {
    pub kind: DriveActivityKind,
    pub busy: bool,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ActivityState {
    kind: DriveActivityKind,
    started_at: Option<DateTime<Utc>>,
    in_flight: usize,
}

impl Default for ActivityState {
    fn default() -> Self {
        Self {
            kind: DriveActivityKind::Idle,
            started_at: None,
            in_flight: 0,
        }
    }
}

struct ActivityGuard {
    state: Arc<Mutex<ActivityState>>,
}

impl ActivityGuard {
    fn begin(state: &Arc<Mutex<ActivityState>>, kind: DriveActivityKind) -> Self {
        {
            let mut s = state.lock().unwrap_or_else(|e| e.into_inner());
            s.kind = kind;
            s.started_at = Some(Utc::now());
            s.in_flight += 1;
        }
        Self {
            state: state.clone(),
        }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.in_flight = s.in_flight.saturating_sub(1);
        if s.in_flight == 0 {
            *s = ActivityState::default();
        }
    }
}

/// A scheduled switch. The switch runs whether or not this is awaited.
pub struct SwitchTicket {
    key: DriveKey,
    task: JoinHandle<Result<DriveHandle>>,
}

impl SwitchTicket {
    pub fn key(&self) -> &DriveKey {
        &self.key
    }

    /// Wait for the switch to finish.
    pub async fn wait(self) -> Result<DriveHandle> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Drive(format!(
                "Switch to {} did not complete: {}",
                self.key.short(),
                e
            ))),
        }
    }
}

/// Orders every drive operation of the process.
pub struct DriveLifecycleManager {
    ensurer: Arc<RwLock<Arc<dyn DriveEnsurer>>>,
    switch_tail: Mutex<Tail>,
    replicate_tail: Mutex<Tail>,
    switch_generation: AtomicU64,
    activity: Arc<Mutex<ActivityState>>,
}

impl DriveLifecycleManager {
    pub fn new(ensurer: Arc<dyn DriveEnsurer>) -> Self {
        Self {
            ensurer: Arc::new(RwLock::new(ensurer)),
            switch_tail: Mutex::new(settled_tail()),
            replicate_tail: Mutex::new(settled_tail()),
            switch_generation: AtomicU64::new(0),
            activity: Arc::new(Mutex::new(ActivityState::default())),
        }
    }

    fn current_ensurer(slot: &RwLock<Arc<dyn DriveEnsurer>>) -> Arc<dyn DriveEnsurer> {
        slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn pending_switches(&self) -> Tail {
        self.switch_tail
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the drive source. Both chains start over; work already
    /// scheduled keeps running against whatever it resolves at run time.
    pub fn substitute_ensurer(&self, ensurer: Arc<dyn DriveEnsurer>) {
        *self.ensurer.write().unwrap_or_else(|e| e.into_inner()) = ensurer;
        *self.switch_tail.lock().unwrap_or_else(|e| e.into_inner()) = settled_tail();
        *self.replicate_tail.lock().unwrap_or_else(|e| e.into_inner()) = settled_tail();
        debug!("Drive ensurer substituted; lifecycle chains reset");
    }

    /// Queue a forced rebuild onto `key` behind every earlier switch.
    ///
    /// Scheduling happens synchronously, so two calls made in order run
    /// in that order even if neither is awaited.
    pub fn schedule_switch(&self, key: DriveKey, replicate: bool) -> SwitchTicket {
        self.schedule(key, replicate, None)
    }

    /// Like [`schedule_switch`](Self::schedule_switch), running `rollback`
    /// inside the chain if the switch fails. Anything waiting behind the
    /// switch observes the rolled-back state.
    pub fn schedule_switch_with_rollback(
        &self,
        key: DriveKey,
        replicate: bool,
        rollback: impl FnOnce() + Send + 'static,
    ) -> SwitchTicket {
        self.schedule(key, replicate, Some(Box::new(rollback)))
    }

    fn schedule(&self, key: DriveKey, replicate: bool, rollback: Option<Rollback>) -> SwitchTicket {
        let options = EnsureOptions {
            key: Some(key.clone()),
            force: true,
            replicate,
        };
        let ensurer = self.ensurer.clone();
        let activity = self.activity.clone();
        let (done, done_rx) = oneshot::channel::<()>();

        let mut tail = self.switch_tail.lock().unwrap_or_else(|e| e.into_inner());
        self.switch_generation.fetch_add(1, Ordering::SeqCst);
        let previous = tail.clone();
        let label = key.short().to_string();
        let task = tokio::spawn(async move {
            previous.await;
            let _busy = ActivityGuard::begin(&activity, DriveActivityKind::Switch);
            debug!("Switching drive to {}", label);
            let result = Self::current_ensurer(&ensurer).ensure(options).await;
            if let Err(e) = &result {
                warn!("Drive switch to {} failed: {}", label, e);
                if let Some(rollback) = rollback {
                    rollback();
                }
            }
            drop(done);
            result
        });
        *tail = tail_from(done_rx);

        SwitchTicket { key, task }
    }

    /// Switch to `key` without replication and wait for the result.
    pub async fn switch(&self, key: DriveKey) -> Result<DriveHandle> {
        self.schedule_switch(key, false).wait().await
    }

    /// Obtain the active drive once no switch is pending.
    pub async fn ensure(&self, options: EnsureOptions) -> Result<DriveHandle> {
        self.pending_switches().await;
        let _busy = ActivityGuard::begin(&self.activity, DriveActivityKind::Ensure);
        Self::current_ensurer(&self.ensurer).ensure(options).await
    }

    /// Obtain the active drive for a key chosen once no switch is pending.
    ///
    /// `resolve` runs after the switch chain settles, so it sees the
    /// outcome of every earlier switch including its rollback. If another
    /// switch is scheduled while the drive is being ensured, the whole
    /// step repeats. Returns the resolved key with the handle.
    pub async fn ensure_resolved(
        &self,
        resolve: impl Fn() -> Option<DriveKey>,
        options: EnsureOptions,
    ) -> Result<(Option<DriveKey>, DriveHandle)> {
        loop {
            self.pending_switches().await;
            let generation = self.switch_generation.load(Ordering::SeqCst);
            let requested = resolve();
            let handle = {
                let _busy = ActivityGuard::begin(&self.activity, DriveActivityKind::Ensure);
                Self::current_ensurer(&self.ensurer)
                    .ensure(options.clone().with_key(requested.clone()))
                    .await?
            };
            if self.switch_generation.load(Ordering::SeqCst) == generation {
                return Ok((requested, handle));
            }
            debug!("Switch scheduled while ensuring; resolving the drive again");
        }
    }

    /// Replicate `key` in the background, after pending switches and
    /// earlier replications. Failures are logged, never surfaced.
    pub fn replicate(&self, key: DriveKey) -> JoinHandle<()> {
        let ensurer = self.ensurer.clone();
        let activity = self.activity.clone();
        let (done, done_rx) = oneshot::channel::<()>();

        let mut tail = self
            .replicate_tail
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let previous = tail.clone();
        let switches = self.pending_switches();
        let task = tokio::spawn(async move {
            switches.await;
            previous.await;
            let _busy = ActivityGuard::begin(&activity, DriveActivityKind::Replicate);
            let options = EnsureOptions::replicated().with_key(Some(key.clone()));
            match Self::current_ensurer(&ensurer).ensure(options).await {
                Ok(handle) => debug!(
                    "Background replication of {} ready ({} peers)",
                    key.short(),
                    handle.peer_count
                ),
                Err(e) => warn!("Background replication of {} failed: {}", key.short(), e),
            }
            drop(done);
        });
        *tail = tail_from(done_rx);
        task
    }

    /// Resolves when every switch and replication scheduled so far is done.
    pub async fn settle(&self) {
        let switches = self.pending_switches();
        let replications = self
            .replicate_tail
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        switches.await;
        replications.await;
    }

    pub fn activity(&self) -> DriveActivity {
        let s = self.activity.lock().unwrap_or_else(|e| e.into_inner());
        DriveActivity {
            kind: s.kind,
            busy: s.in_flight > 0,
            started_at: s.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pearl_storage::{Drive, DriveStore, MemoryDriveStore};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Ensurer that records call order and can be held at a gate.
    struct Recording {
        store: MemoryDriveStore,
        calls: Mutex<Vec<EnsureOptions>>,
        gate: Notify,
        gated: std::sync::atomic::AtomicBool,
        fail_key: Mutex<Option<DriveKey>>,
    }

    impl Recording {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                store: MemoryDriveStore::new(),
                calls: Mutex::new(Vec::new()),
                gate: Notify::new(),
                gated: std::sync::atomic::AtomicBool::new(false),
                fail_key: Mutex::new(None),
            })
        }

        fn calls(&self) -> Vec<EnsureOptions> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DriveEnsurer for Recording {
        async fn ensure(&self, options: EnsureOptions) -> Result<DriveHandle> {
            self.calls.lock().unwrap().push(options.clone());
            if self.gated.load(std::sync::atomic::Ordering::SeqCst) {
                self.gate.notified().await;
            }
            if options.key.is_some() && *self.fail_key.lock().unwrap() == options.key {
                return Err(Error::Drive("refused".to_string()));
            }
            let drive: Arc<dyn Drive> = self.store.open_drive(options.key.as_ref()).await?;
            Ok(DriveHandle {
                key: drive.key().clone(),
                drive,
                peer_count: 0,
            })
        }
    }

    fn key(c: char) -> DriveKey {
        DriveKey::parse(&c.to_string().repeat(64)).unwrap()
    }

    #[tokio::test]
    async fn test_switches_run_in_schedule_order() {
        let ensurer = Recording::new();
        let manager = DriveLifecycleManager::new(ensurer.clone());

        let first = manager.schedule_switch(key('a'), false);
        let second = manager.schedule_switch(key('b'), false);
        let third = manager.schedule_switch(key('c'), true);

        assert_eq!(third.wait().await.unwrap().key, key('c'));
        assert_eq!(second.wait().await.unwrap().key, key('b'));
        assert_eq!(first.wait().await.unwrap().key, key('a'));

        let keys: Vec<_> = ensurer.calls().into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec![Some(key('a')), Some(key('b')), Some(key('c'))]);
        assert!(ensurer.calls().iter().all(|o| o.force));
    }

    #[tokio::test]
    async fn test_ensure_waits_for_pending_switch() {
        let ensurer = Recording::new();
        ensurer.gated.store(true, std::sync::atomic::Ordering::SeqCst);
        let manager = Arc::new(DriveLifecycleManager::new(ensurer.clone()));

        let switch = manager.schedule_switch(key('a'), false);
        let ensure = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure(EnsureOptions::local()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ensurer.calls().len(), 1);
        assert_eq!(manager.activity().kind, DriveActivityKind::Switch);
        assert!(manager.activity().busy);

        ensurer.gated.store(false, std::sync::atomic::Ordering::SeqCst);
        ensurer.gate.notify_one();
        switch.wait().await.unwrap();
        ensure.await.unwrap().unwrap();

        let calls = ensurer.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls[1].force);
        assert!(!manager.activity().busy);
    }

    #[tokio::test]
    async fn test_failed_switch_does_not_block_chain() {
        let ensurer = Recording::new();
        *ensurer.fail_key.lock().unwrap() = Some(key('a'));
        let manager = DriveLifecycleManager::new(ensurer.clone());

        let failing = manager.schedule_switch(key('a'), false);
        let next = manager.schedule_switch(key('b'), false);

        assert!(failing.wait().await.is_err());
        assert_eq!(next.wait().await.unwrap().key, key('b'));
    }

    #[tokio::test]
    async fn test_replicate_runs_after_switch_and_swallows_errors() {
        let ensurer = Recording::new();
        *ensurer.fail_key.lock().unwrap() = Some(key('f'));
        let manager = DriveLifecycleManager::new(ensurer.clone());

        let switch = manager.schedule_switch(key('a'), false);
        manager.replicate(key('a'));
        manager.replicate(key('f'));
        manager.settle().await;
        switch.wait().await.unwrap();

        let calls = ensurer.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].force && !calls[0].replicate);
        assert!(calls[1].replicate && !calls[1].force);
        assert_eq!(calls[2].key, Some(key('f')));
        assert_eq!(manager.activity().kind, DriveActivityKind::Idle);
    }

    #[tokio::test]
    async fn test_rollback_is_visible_to_waiting_ensure() {
        let ensurer = Recording::new();
        *ensurer.fail_key.lock().unwrap() = Some(key('c'));
        let manager = DriveLifecycleManager::new(ensurer.clone());

        let selected = Arc::new(Mutex::new(Some(key('c'))));
        let restore = selected.clone();
        let switch = manager.schedule_switch_with_rollback(key('c'), false, move || {
            *restore.lock().unwrap() = Some(key('a'));
        });

        let (requested, handle) = manager
            .ensure_resolved(|| selected.lock().unwrap().clone(), EnsureOptions::local())
            .await
            .unwrap();

        assert_eq!(requested, Some(key('a')));
        assert_eq!(handle.key, key('a'));
        assert!(switch.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_ensure_resolved_repeats_after_concurrent_switch() {
        let ensurer = Recording::new();
        ensurer.gated.store(true, std::sync::atomic::Ordering::SeqCst);
        let manager = Arc::new(DriveLifecycleManager::new(ensurer.clone()));

        let selected = Arc::new(Mutex::new(Some(key('a'))));
        let ensure = {
            let manager = manager.clone();
            let selected = selected.clone();
            tokio::spawn(async move {
                manager
                    .ensure_resolved(
                        move || selected.lock().unwrap().clone(),
                        EnsureOptions::local(),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ensurer.calls().len(), 1);

        *selected.lock().unwrap() = Some(key('b'));
        ensurer.gated.store(false, std::sync::atomic::Ordering::SeqCst);
        let switch = manager.schedule_switch(key('b'), false);
        ensurer.gate.notify_one();

        let (requested, handle) = ensure.await.unwrap().unwrap();
        switch.wait().await.unwrap();

        assert_eq!(requested, Some(key('b')));
        assert_eq!(handle.key, key('b'));
        let keys: Vec<_> = ensurer.calls().into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec![Some(key('a')), Some(key('b')), Some(key('b'))]);
    }

    #[tokio::test]
    async fn test_substitute_resets_chains() {
        let stuck = Recording::new();
        stuck.gated.store(true, std::sync::atomic::Ordering::SeqCst);
        let manager = DriveLifecycleManager::new(stuck.clone());
        let _pending = manager.schedule_switch(key('a'), false);

        let fresh = Recording::new();
        manager.substitute_ensurer(fresh.clone());

        let handle = tokio::time::timeout(
            Duration::from_secs(1),
            manager.ensure(EnsureOptions::local()),
        )
        .await
        .expect("ensure should not wait behind the old chain")
        .unwrap();
        assert_eq!(fresh.calls().len(), 1);
        assert_eq!(handle.peer_count, 0);
    }
}
