//! Listener bookkeeping for the realtime bridge

use nfc_profile_shared::{EventKind, ServerEvent};
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked for every matching event
pub type Listener = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Token returned by `on`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered listeners per event kind
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    pub fn add(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.entry(kind).or_default().push((id, listener));
        id
    }

    /// Returns whether the listener was registered
    pub fn remove(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let Some(entries) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.listeners.remove(&kind);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Listeners for `kind` in registration order, cloned so they can be
    /// invoked without holding the registry lock
    pub fn snapshot(&self, kind: EventKind) -> Vec<Listener> {
        self.listeners
            .get(&kind)
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }
}
