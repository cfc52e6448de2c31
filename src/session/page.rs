//! Page visibility and unload signals

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    Hidden,
    Visible,
    /// The page is going away; asynchronous work may not complete
    Unload,
}

/// Broadcast source of page lifecycle events.
///
/// Cloning shares the same channel and visibility flag.
#[derive(Clone)]
pub struct PageLifecycle {
    tx: broadcast::Sender<PageEvent>,
    hidden: Arc<AtomicBool>,
}

impl Default for PageLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl PageLifecycle {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            hidden: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn emit(&self, event: PageEvent) {
        match event {
            PageEvent::Hidden => self.hidden.store(true, Ordering::SeqCst),
            PageEvent::Visible => self.hidden.store(false, Ordering::SeqCst),
            PageEvent::Unload => {}
        }
        // No receivers is fine, nothing is tracking yet
        if self.tx.send(event).is_err() {
            debug!("No observers for {:?}", event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.tx.subscribe()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::SeqCst)
    }
}
