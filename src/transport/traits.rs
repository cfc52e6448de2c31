//! Transport trait abstraction for pluggable network backends

use anyhow::Result;
use async_trait::async_trait;
use nfc_profile_shared::ActionReport;
use url::Url;

/// Request/response delivery of session reports
#[async_trait]
pub trait ActionReporter: Send + Sync {
    /// Associate an action with a session
    async fn report_action(&self, session_id: &str, report: &ActionReport) -> Result<()>;

    /// Tell the backend the session is over
    async fn end_session(&self, session_id: &str) -> Result<()>;
}

/// Send-and-forget delivery that outlives the caller.
///
/// Implementations only enqueue; delivery must not depend on the caller's
/// task or runtime staying alive.
#[async_trait]
pub trait Beacon: Send + Sync {
    /// Queue an end-of-session signal. Returns `false` if it was not accepted.
    fn send_end(&self, session_id: &str) -> bool;

    /// Stop accepting signals and wait, bounded, for queued ones to go out
    async fn flush(&self) {}
}

/// A bidirectional text frame stream
#[async_trait]
pub trait FrameTransport: Send {
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Next text frame, or `None` once the peer closed the stream.
    ///
    /// Must be cancel-safe: it is raced against other branches.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the transport gracefully
    async fn close(&mut self) -> Result<()>;
}

/// Factory for creating transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// The transport type this connector produces
    type Transport: FrameTransport + 'static;

    /// Attempt to connect, returning a transport on success
    async fn connect(&self, url: &Url) -> Result<Self::Transport>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
