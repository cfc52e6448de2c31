//! NFC Profile Shared Protocol Types
//!
//! This crate provides the wire-level vocabulary shared by the profile session
//! tracker and the realtime admin bridge: tracked actions, realtime event
//! names, the Socket.IO packet codec and the connection state machine.

pub mod codec;
pub mod events;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use events::{ClientEvent, EventKind, ServerEvent, StudentStatus};
pub use state_machine::{LinkEvent, LinkState, LinkStateMachine, ReconnectPolicy, TransitionResult};

/// Timing parameters for session tracking and the realtime link
pub mod tracking {
    /// Liveness ping interval while the page is visible
    pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

    /// Idle time after which a session ends itself
    pub const INACTIVITY_TIMEOUT_MS: u64 = 5 * 60 * 1000;

    /// Upper bound for a single action/end report
    pub const REPORT_TIMEOUT_MS: u64 = 10_000;

    /// Reconnection attempts after the first failure
    pub const RECONNECTION_ATTEMPTS: u32 = 5;

    /// Delay before the first reconnection attempt
    pub const RECONNECTION_DELAY_MS: u64 = 1000;

    /// Cap for the doubling reconnection delay
    pub const RECONNECTION_DELAY_MAX_MS: u64 = 5000;

    /// Handshake timeout for the realtime transport
    pub const CONNECT_TIMEOUT_MS: u64 = 20_000;
}

/// Fixed vocabulary of actions a profile viewer can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackedAction {
    View,
    Call,
    Share,
    Download,
    Print,
}

impl TrackedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedAction::View => "view",
            TrackedAction::Call => "call",
            TrackedAction::Share => "share",
            TrackedAction::Download => "download",
            TrackedAction::Print => "print",
        }
    }
}

impl fmt::Display for TrackedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /student/session/{sessionId}/action`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub action: TrackedAction,
    pub details: Option<String>,
}

/// Builder helpers for the reports the tracker sends
impl ActionReport {
    pub fn new(action: TrackedAction, details: Option<String>) -> Self {
        Self { action, details }
    }

    /// Phone number tapped on the profile
    pub fn call(phone_number: &str) -> Self {
        Self::new(TrackedAction::Call, Some(format!("Called {}", phone_number)))
    }

    pub fn share() -> Self {
        Self::new(TrackedAction::Share, Some("Profile shared".into()))
    }

    pub fn download(item_name: &str) -> Self {
        Self::new(TrackedAction::Download, Some(format!("Downloaded {}", item_name)))
    }

    pub fn print() -> Self {
        Self::new(TrackedAction::Print, Some("Profile printed".into()))
    }

    /// Heartbeat liveness ping
    pub fn heartbeat() -> Self {
        Self::new(TrackedAction::View, Some("Page active".into()))
    }

    /// Sent when a hidden page comes back into view
    pub fn page_visible() -> Self {
        Self::new(TrackedAction::View, Some("Page became visible".into()))
    }
}
