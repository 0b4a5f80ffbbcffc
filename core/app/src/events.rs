//! Vault notifications.
//!
//! Consumers either subscribe to the broadcast stream or register a
//! handler for one event kind and later remove it by id.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

use pearl_common::DriveKey;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Something consumers may want to react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VaultEvent {
    /// A join finished; the device is now on `drive_key`.
    #[serde(rename_all = "camelCase")]
    Joined {
        drive_key: DriveKey,
        previous_key: Option<DriveKey>,
    },
    /// A join failed after validation; the previous vault is still active.
    #[serde(rename_all = "camelCase")]
    JoinError {
        error: String,
        previous_key: Option<DriveKey>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultEventKind {
    Joined,
    JoinError,
}

impl VaultEvent {
    pub fn kind(&self) -> VaultEventKind {
        match self {
            VaultEvent::Joined { .. } => VaultEventKind::Joined,
            VaultEvent::JoinError { .. } => VaultEventKind::JoinError,
        }
    }
}

/// Handle returned by [`VaultEvents::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type EventHandler = Arc<dyn Fn(&VaultEvent) + Send + Sync>;

struct Registration {
    id: SubscriptionId,
    kind: VaultEventKind,
    handler: EventHandler,
}

pub struct VaultEvents {
    sender: broadcast::Sender<VaultEvent>,
    handlers: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl VaultEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sender,
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stream of every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.sender.subscribe()
    }

    /// Call `handler` for each event of `kind`.
    pub fn on(
        &self,
        kind: VaultEventKind,
        handler: impl Fn(&VaultEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Registration {
                id,
                kind,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    pub fn emit(&self, event: VaultEvent) {
        let matching: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.kind == event.kind())
            .map(|r| r.handler.clone())
            .collect();

        for handler in matching {
            handler(&event);
        }

        if self.sender.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

impl Default for VaultEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn joined() -> VaultEvent {
        VaultEvent::Joined {
            drive_key: DriveKey::parse(&"a".repeat(64)).unwrap(),
            previous_key: None,
        }
    }

    #[test]
    fn test_handlers_filter_by_kind_and_unsubscribe() {
        let events = VaultEvents::new();
        let joins = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let counter = joins.clone();
        let id = events.on(VaultEventKind::Joined, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = errors.clone();
        events.on(VaultEventKind::JoinError, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        events.emit(joined());
        assert!(events.off(id));
        assert!(!events.off(id));
        events.emit(joined());

        assert_eq!(joins.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_broadcast_subscribers_receive() {
        let events = VaultEvents::new();
        let mut rx = events.subscribe();
        events.emit(joined());
        assert_eq!(rx.recv().await.unwrap(), joined());
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(VaultEvent::JoinError {
            error: "boom".to_string(),
            previous_key: None,
        })
        .unwrap();
        assert_eq!(json["type"], "join-error");
        assert_eq!(json["error"], "boom");
        assert!(json["previousKey"].is_null());
    }
}
