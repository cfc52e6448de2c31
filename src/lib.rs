//! NFC profile client
//!
//! Tracks profile view sessions against the backend and keeps admin views in
//! sync through a realtime push connection.

pub mod config;
pub mod notifications;
pub mod profile;
pub mod realtime;
pub mod session;
pub mod transport;

pub use config::{ClientConfig, RealtimeConfig, TrackerConfig, TransportKind};
pub use notifications::{Notification, NotificationFeed, NotificationKind};
pub use profile::{ProfileClient, StudentProfile};
pub use realtime::{ConnectionHandle, ListenerId, RealtimeBridge};
pub use session::{PageEvent, PageLifecycle, SessionTracker};
