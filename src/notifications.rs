//! Short-lived notifications built from admin push events

use crate::realtime::{ListenerId, RealtimeBridge};
use crate::transport::TransportConnector;
use nfc_profile_shared::{EventKind, ServerEvent};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// How long a notification stays visible unless dismissed
pub const NOTIFICATION_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Scan,
    Added,
    Updated,
    Deleted,
    Status,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub expires_at: Instant,
}

/// Visible notifications, oldest first
pub struct NotificationFeed {
    ttl: Duration,
    next_id: AtomicU64,
    entries: Mutex<VecDeque<Notification>>,
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::new(NOTIFICATION_TTL)
    }
}

impl NotificationFeed {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next_id: AtomicU64::new(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Subscribe the feed to every admin push event on the bridge
    pub fn attach<C: TransportConnector>(
        self: &Arc<Self>,
        bridge: &RealtimeBridge<C>,
    ) -> Vec<ListenerId> {
        [
            EventKind::StudentScanned,
            EventKind::StudentAdded,
            EventKind::StudentUpdated,
            EventKind::StudentDeleted,
            EventKind::StudentStatusChanged,
            EventKind::SchoolAdded,
            EventKind::SchoolUpdated,
        ]
        .into_iter()
        .filter_map(|kind| {
            let feed = Arc::clone(self);
            bridge.on(kind, move |event| {
                feed.push_event(event);
            })
        })
        .collect()
    }

    /// Add a notification for `event`. Lifecycle events produce none.
    pub fn push_event(&self, event: &ServerEvent) -> Option<Notification> {
        let (kind, title, message) = describe(event)?;
        let notification = Notification {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            kind,
            title: title.to_string(),
            message,
            expires_at: Instant::now() + self.ttl,
        };
        debug!("Notification {}: {}", notification.title, notification.message);
        self.entries.lock().push_back(notification.clone());
        Some(notification)
    }

    /// Unexpired notifications, dropping the expired ones
    pub fn visible(&self) -> Vec<Notification> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|n| n.expires_at > now);
        entries.iter().cloned().collect()
    }

    pub fn dismiss(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|n| n.id != id);
        entries.len() != before
    }
}

fn describe(event: &ServerEvent) -> Option<(NotificationKind, &'static str, String)> {
    let described = match event {
        ServerEvent::StudentScanned(student) => (
            NotificationKind::Scan,
            "Card Scanned",
            format!("{} scanned their NFC card", display_name(student, "A student")),
        ),
        ServerEvent::StudentAdded(student) => (
            NotificationKind::Added,
            "Student Added",
            format!("{} was added", display_name(student, "A new student")),
        ),
        ServerEvent::StudentUpdated(student) => (
            NotificationKind::Updated,
            "Student Updated",
            format!("{} was updated", display_name(student, "A student")),
        ),
        ServerEvent::StudentDeleted { student_id } => (
            NotificationKind::Deleted,
            "Student Deleted",
            format!("Student {} was removed", student_id),
        ),
        ServerEvent::StudentStatusChanged(status) => (
            NotificationKind::Status,
            "Status Changed",
            format!(
                "Student {} is now {}",
                status.student_id,
                if status.is_active { "active" } else { "inactive" }
            ),
        ),
        ServerEvent::SchoolAdded(school) => (
            NotificationKind::Added,
            "School Added",
            format!("{} was added", display_name(school, "A new school")),
        ),
        ServerEvent::SchoolUpdated(school) => (
            NotificationKind::Updated,
            "School Updated",
            format!("{} was updated", display_name(school, "A school")),
        ),
        ServerEvent::Connect { .. }
        | ServerEvent::Disconnect { .. }
        | ServerEvent::ConnectError { .. }
        | ServerEvent::AdminConnected { .. } => return None,
    };
    Some(described)
}

fn display_name(record: &Value, fallback: &str) -> String {
    let name = record.get("name").and_then(Value::as_str);
    let id = record.get("studentId").and_then(Value::as_str);
    match (name, id) {
        (Some(name), Some(id)) => format!("{} ({})", name, id),
        (Some(name), None) => name.to_string(),
        (None, Some(id)) => id.to_string(),
        (None, None) => fallback.to_string(),
    }
}
