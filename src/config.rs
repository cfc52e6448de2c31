//! Client configuration
//!
//! Compiled defaults with environment overrides. The API base drives both the
//! session endpoints and the realtime origin.

use anyhow::{anyhow, Result};
use nfc_profile_shared::{tracking, ReconnectPolicy};
use std::time::Duration;
use tracing::warn;
use url::Url;

/// API base used when `NFC_API_URL` is unset
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Realtime origin used when no API base is configured
pub const DEFAULT_SOCKET_URL: &str = "http://localhost:5000";

/// Preferred realtime transports, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Polling,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::Polling => write!(f, "polling"),
        }
    }
}

/// Session tracker timing
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Liveness ping period while the page is visible
    pub heartbeat_interval: Duration,
    /// Idle time after which the session ends itself
    pub inactivity_timeout: Duration,
    /// Bound for each action/end report
    pub report_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(tracking::HEARTBEAT_INTERVAL_MS),
            inactivity_timeout: Duration::from_millis(tracking::INACTIVITY_TIMEOUT_MS),
            report_timeout: Duration::from_millis(tracking::REPORT_TIMEOUT_MS),
        }
    }
}

/// Realtime bridge connection options
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub transports: Vec<TransportKind>,
    pub reconnect: ReconnectPolicy,
    /// Transport connect plus Socket.IO handshake
    pub connect_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_millis(tracking::CONNECT_TIMEOUT_MS),
        }
    }
}

/// Configuration for the tracker, the bridge and the HTTP clients
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub socket_url: Url,
    pub tracker: TrackerConfig,
    pub realtime: RealtimeConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            socket_url: Url::parse(DEFAULT_SOCKET_URL).expect("default socket URL is valid"),
            tracker: TrackerConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Build a config for a given API base, deriving the realtime origin from it
    pub fn with_api_url(api_url: &str) -> Result<Self> {
        let api_url = Url::parse(api_url).map_err(|e| anyhow!("Invalid API URL {}: {}", api_url, e))?;
        Ok(Self {
            socket_url: socket_origin(&api_url),
            api_url,
            ..Default::default()
        })
    }

    /// Load from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    ///
    /// Malformed or out-of-range values are ignored and the default is kept.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("NFC_API_URL").filter(|v| !v.trim().is_empty()) {
            Some(raw) => match Self::with_api_url(raw.trim()) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Ignoring NFC_API_URL: {}", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        if let Some(v) = read_u64(&lookup, "NFC_HEARTBEAT_INTERVAL_MS", 1_000, 600_000) {
            config.tracker.heartbeat_interval = Duration::from_millis(v);
        }
        if let Some(v) = read_u64(&lookup, "NFC_INACTIVITY_TIMEOUT_MS", 10_000, 24 * 3_600_000) {
            config.tracker.inactivity_timeout = Duration::from_millis(v);
        }
        if let Some(v) = read_u64(&lookup, "NFC_REPORT_TIMEOUT_MS", 100, 120_000) {
            config.tracker.report_timeout = Duration::from_millis(v);
        }
        if let Some(v) = read_u64(&lookup, "NFC_RECONNECT_ATTEMPTS", 0, 100) {
            config.realtime.reconnect.max_attempts = v as u32;
        }
        if let Some(v) = read_u64(&lookup, "NFC_RECONNECT_DELAY_MS", 10, 60_000) {
            config.realtime.reconnect.delay_ms = v;
        }
        if let Some(v) = read_u64(&lookup, "NFC_CONNECT_TIMEOUT_MS", 100, 120_000) {
            config.realtime.connect_timeout = Duration::from_millis(v);
        }

        config
    }

    /// `POST` target for action reports
    pub fn action_url(&self, session_id: &str) -> Url {
        self.api_endpoint(&["student", "session", session_id, "action"])
    }

    /// `POST` target for session termination (request and beacon)
    pub fn end_url(&self, session_id: &str) -> Url {
        self.api_endpoint(&["student", "session", session_id, "end"])
    }

    /// `GET` target for a public student profile
    pub fn student_url(&self, student_id: &str) -> Url {
        self.api_endpoint(&["student", student_id])
    }

    /// Socket.IO WebSocket endpoint on the realtime origin
    pub fn socket_io_url(&self) -> Result<Url> {
        let mut url = self.socket_url.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(anyhow!("Unsupported realtime scheme: {}", other)),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("Cannot switch {} to {}", self.socket_url, scheme))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Realtime origin cannot be a base: {}", self.socket_url))?
            .pop_if_empty()
            .extend(["socket.io", ""]);
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(url)
    }

    /// Append percent-encoded segments to the API base
    fn api_endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

/// Strip a trailing `/api` path from the API base
fn socket_origin(api_url: &Url) -> Url {
    let mut origin = api_url.clone();
    let path = origin.path().trim_end_matches('/');
    let stripped = path.strip_suffix("/api").unwrap_or(path).to_string();
    origin.set_path(if stripped.is_empty() { "/" } else { &stripped });
    origin.set_query(None);
    origin
}

fn read_u64<F>(lookup: &F, key: &str, min: u64, max: u64) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) if (min..=max).contains(&v) => Some(v),
        _ => {
            warn!("Ignoring {}={:?} (expected {}..={})", key, raw, min, max);
            None
        }
    }
}
