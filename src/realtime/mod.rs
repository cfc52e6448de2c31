//! Realtime bridge for live admin notifications
//!
//! This module handles:
//! - One Socket.IO connection per bridge with automatic reconnection
//! - Typed subscriptions to server-pushed events
//! - Emitting admin change events after successful REST writes

mod bridge;
mod listeners;
mod manager;

pub use bridge::{ConnectionHandle, RealtimeBridge};
pub use listeners::{Listener, ListenerId};
