//! Listener registry: event kind -> ordered callbacks, fan-out of decoded events.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, error, warn};

use crate::models::event::{DecodeError, DiscussionEvent, EventKind};

/// Callback invoked with each matching event.
pub type Listener = Arc<dyn Fn(&DiscussionEvent) + Send + Sync>;

/// Stable id of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Slot {
    id: ListenerId,
    callback: Listener,
}

/// Registrations per event kind, in insertion order. Duplicates are allowed.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    slots: RwLock<HashMap<EventKind, Vec<Slot>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: EventKind, callback: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Slot { id, callback });
        debug!(event = %kind, listener = id.0, "listener registered");
        id
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn remove(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = slots.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|slot| slot.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            slots.remove(&kind);
        }
        removed
    }

    pub fn clear(&self) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Total number of registrations across all kinds.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener for the event's kind, in registration order.
    ///
    /// The list is read fresh for each event and called without holding the
    /// lock, so callbacks may register or remove listeners. A panicking
    /// listener is logged and the rest still run. Returns how many were called.
    pub fn dispatch(&self, event: &DiscussionEvent) -> usize {
        let kind = event.kind();
        let callbacks: Vec<(ListenerId, Listener)> = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            match slots.get(&kind) {
                Some(list) => list
                    .iter()
                    .map(|slot| (slot.id, slot.callback.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        for (id, callback) in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(event = %kind, listener = id.0, "listener panicked during dispatch");
            }
        }
        callbacks.len()
    }

    /// Decode a raw frame body and dispatch it. Undecodable bodies are logged and dropped.
    pub fn dispatch_raw(&self, body: &str) -> usize {
        match DiscussionEvent::decode(body) {
            Ok(event) => self.dispatch(&event),
            Err(DecodeError::UnknownKind(e)) => {
                debug!(error = %e, "ignoring event of unknown type");
                0
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable event frame");
                0
            }
        }
    }
}

/// Returned by [`DiscussionClient::on`](crate::DiscussionClient::on); removes exactly one registration.
#[derive(Clone)]
pub struct ListenerHandle {
    kind: EventKind,
    id: ListenerId,
    registry: Weak<ListenerRegistry>,
}

impl ListenerHandle {
    pub(crate) fn new(kind: EventKind, id: ListenerId, registry: &Arc<ListenerRegistry>) -> Self {
        Self {
            kind,
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Stop receiving events. Calling it again is harmless.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.kind, self.id);
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}
