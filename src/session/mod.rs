//! Profile view session tracking
//!
//! This module handles:
//! - Session start/end with backend notification
//! - Heartbeat pings and inactivity shutdown
//! - Pausing on hidden pages and ending on unload

mod page;
mod tracker;

pub use page::{PageEvent, PageLifecycle};
pub use tracker::SessionTracker;
