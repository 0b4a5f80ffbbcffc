//! Coalescing mirror of the drive's notes to a local folder.
//!
//! At most one pass runs at a time. A request that arrives mid-pass only
//! marks a rerun and shares the in-flight completion, so a burst of writes
//! costs at most one extra pass. Each pass uses the most recently queued
//! drive.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::export::ExportPaths;
use crate::NOTES_DIR;
use pearl_common::{DrivePath, Result};
use pearl_storage::{Drive, LocalFolder};

/// Resolves once the mirror queue has drained.
pub type MirrorCompletion = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
struct MirrorState {
    in_flight: Option<MirrorCompletion>,
    rerun: bool,
    last_drive: Option<Arc<dyn Drive>>,
}

struct MirrorInner {
    paths: ExportPaths,
    target: LocalFolder,
    state: Mutex<MirrorState>,
    passes: AtomicUsize,
}

/// Handle to the process-wide notes mirror. Cheap to clone.
#[derive(Clone)]
pub struct NotesMirror {
    inner: Arc<MirrorInner>,
}

impl NotesMirror {
    pub fn new(paths: ExportPaths) -> Self {
        let target = LocalFolder::new(&paths.base_root);
        Self {
            inner: Arc::new(MirrorInner {
                paths,
                target,
                state: Mutex::new(MirrorState::default()),
                passes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn paths(&self) -> &ExportPaths {
        &self.inner.paths
    }

    /// Completed passes since creation.
    pub fn passes(&self) -> usize {
        self.inner.passes.load(Ordering::SeqCst)
    }

    /// Request a mirror of `drive`.
    ///
    /// Starts a pass if none is running; otherwise marks a rerun and
    /// returns the running completion. The returned future need not be
    /// awaited.
    pub fn queue(&self, drive: Arc<dyn Drive>) -> MirrorCompletion {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.last_drive = Some(drive);

        if let Some(in_flight) = state.in_flight.clone() {
            state.rerun = true;
            return in_flight;
        }

        state.rerun = false;
        let (done, done_rx) = oneshot::channel::<()>();
        let completion: MirrorCompletion = done_rx.map(|_| ()).boxed().shared();
        state.in_flight = Some(completion.clone());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.drain().await;
            drop(done);
        });
        completion
    }

    /// Mirror again with `drive`, or with the last drive seen. Resolves
    /// immediately if there has never been one.
    pub fn export_all(&self, drive: Option<Arc<dyn Drive>>) -> MirrorCompletion {
        let drive = drive.or_else(|| {
            self.inner
                .state
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .last_drive
                .clone()
        });
        match drive {
            Some(drive) => self.queue(drive),
            None => futures::future::ready(()).boxed().shared(),
        }
    }
}

impl MirrorInner {
    async fn drain(&self) {
        loop {
            let drive = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.rerun = false;
                state.last_drive.clone()
            };

            if let Some(drive) = drive {
                if let Err(e) = self.run_pass(drive.as_ref()).await {
                    warn!("Failed to mirror notes drive: {}", e);
                }
                self.passes.fetch_add(1, Ordering::SeqCst);
            }

            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.rerun {
                state.in_flight = None;
                break;
            }
        }
    }

    /// Make the local notes folder match the drive's, pruning extras.
    async fn run_pass(&self, drive: &dyn Drive) -> Result<()> {
        let notes_dir = DrivePath::parse(NOTES_DIR)?;
        let remote = drive.list(&notes_dir, true).await?;

        let mut wanted = HashSet::with_capacity(remote.len());
        let mut written = 0usize;
        for entry in remote {
            let Some(data) = drive.get(&entry.path).await? else {
                continue;
            };
            if self.target.read(&entry.path).await?.as_deref() != Some(data.as_slice()) {
                self.target.write(&entry.path, &data).await?;
                written += 1;
            }
            wanted.insert(entry.path);
        }

        let mut pruned = 0usize;
        for local in self.target.list(&notes_dir, true).await? {
            if !wanted.contains(&local.path) {
                match self.target.remove(&local.path).await {
                    Ok(()) => pruned += 1,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        self.target.prune_empty_dirs(&notes_dir).await?;

        debug!(
            "Mirrored notes to {} ({} written, {} pruned)",
            self.paths.notes_root.display(),
            written,
            pruned
        );
        Ok(())
    }
}
