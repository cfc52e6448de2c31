//! Session Tracker
//!
//! Tracks one analytics session per profile view. A background heartbeat
//! pings the backend while the page is visible and ends the session once the
//! visitor has been idle for too long. Every report is best-effort: failures
//! are logged and never reach the caller.

use super::page::{PageEvent, PageLifecycle};
use crate::config::{ClientConfig, TrackerConfig};
use crate::transport::{ActionReporter, Beacon, HttpBeacon, HttpReporter};
use anyhow::Result;
use nfc_profile_shared::{ActionReport, TrackedAction};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct SessionState {
    session_id: Option<String>,
    start_time: Option<Instant>,
    last_activity: Option<Instant>,
    heartbeat: Option<JoinHandle<()>>,
}

impl SessionState {
    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }

    /// Clear the session, returning its id if one was active
    fn clear(&mut self) -> Option<String> {
        self.stop_heartbeat();
        self.start_time = None;
        self.last_activity = None;
        self.session_id.take()
    }
}

struct TrackerInner {
    config: TrackerConfig,
    reporter: Arc<dyn ActionReporter>,
    beacon: Arc<dyn Beacon>,
    page: PageLifecycle,
    state: Mutex<SessionState>,
    observer: OnceLock<JoinHandle<()>>,
}

/// Session tracker shared by the profile page and its handlers.
///
/// Clones refer to the same tracker. Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct SessionTracker {
    inner: Arc<TrackerInner>,
}

impl SessionTracker {
    pub fn new(
        config: TrackerConfig,
        reporter: Arc<dyn ActionReporter>,
        beacon: Arc<dyn Beacon>,
        page: PageLifecycle,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                config,
                reporter,
                beacon,
                page,
                state: Mutex::new(SessionState::default()),
                observer: OnceLock::new(),
            }),
        }
    }

    /// Tracker reporting over HTTP to the configured API
    pub fn from_config(config: &ClientConfig, page: PageLifecycle) -> Result<Self> {
        let reporter = HttpReporter::new(config.clone())?;
        let beacon = HttpBeacon::new(config.clone())?;
        Ok(Self::new(
            config.tracker.clone(),
            Arc::new(reporter),
            Arc::new(beacon),
            page,
        ))
    }

    /// Begin tracking `session_id`, ending any session already in progress
    pub async fn start_session(&self, session_id: &str) {
        if session_id.is_empty() {
            warn!("[SESSION] Ignoring empty session id");
            return;
        }
        self.inner.install_observers();

        let previous = {
            let mut state = self.inner.state.lock();
            let previous = state.clear();
            let now = Instant::now();
            state.session_id = Some(session_id.to_string());
            state.start_time = Some(now);
            state.last_activity = Some(now);
            if self.inner.page.is_hidden() {
                debug!("[SESSION] Page hidden, heartbeat deferred");
            } else {
                state.heartbeat = Some(self.inner.spawn_heartbeat());
            }
            previous
        };

        info!("[SESSION] Started session {}", session_id);
        if let Some(previous) = previous {
            info!("[SESSION] Replaced session {}", previous);
            self.inner.notify_end(&previous).await;
        }
    }

    pub async fn record_action(&self, action: TrackedAction, details: Option<String>) {
        self.inner.record(ActionReport::new(action, details)).await;
    }

    pub async fn track_call(&self, phone_number: &str) {
        self.inner.record(ActionReport::call(phone_number)).await;
    }

    pub async fn track_share(&self) {
        self.inner.record(ActionReport::share()).await;
    }

    pub async fn track_download(&self, item_name: &str) {
        self.inner.record(ActionReport::download(item_name)).await;
    }

    pub async fn track_print(&self) {
        self.inner.record(ActionReport::print()).await;
    }

    /// End the session and tell the backend. No-op without a session.
    pub async fn end_session(&self) {
        self.inner.end_session().await;
    }

    /// End the session from a teardown path that cannot await.
    ///
    /// The end signal goes through the beacon so it is delivered even if the
    /// runtime goes away right after this returns.
    pub fn end_session_on_unload(&self) {
        self.inner.end_session_on_unload();
    }

    /// End any session through the beacon and wait, bounded, for queued end
    /// signals to go out. For hosts that are about to exit.
    pub async fn shutdown(&self) {
        self.inner.end_session_on_unload();
        self.inner.beacon.flush().await;
    }

    /// Elapsed whole seconds since the session started, 0 without a session
    pub fn session_duration(&self) -> u64 {
        self.inner
            .state
            .lock()
            .start_time
            .map(|start| start.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().session_id.is_some()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().session_id.clone()
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.inner.state.lock().last_activity
    }

    pub fn heartbeat_running(&self) -> bool {
        self.inner
            .state
            .lock()
            .heartbeat
            .as_ref()
            .map(|heartbeat| !heartbeat.is_finished())
            .unwrap_or(false)
    }
}

impl TrackerInner {
    fn install_observers(self: &Arc<Self>) {
        self.observer.get_or_init(|| {
            let mut events = self.page.subscribe();
            let tracker = Arc::downgrade(self);
            tokio::spawn(async move {
                loop {
                    let event = match events.recv().await {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("[SESSION] Missed {} page events", skipped);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    let Some(tracker) = tracker.upgrade() else {
                        break;
                    };
                    tracker.on_page_event(event).await;
                }
            })
        });
    }

    async fn on_page_event(self: &Arc<Self>, event: PageEvent) {
        match event {
            PageEvent::Hidden => {
                let mut state = self.state.lock();
                if state.heartbeat.is_some() {
                    debug!("[SESSION] Page hidden, heartbeat paused");
                    state.stop_heartbeat();
                }
            }
            PageEvent::Visible => {
                {
                    let mut state = self.state.lock();
                    if state.session_id.is_none() {
                        return;
                    }
                    state.stop_heartbeat();
                    state.heartbeat = Some(self.spawn_heartbeat());
                }
                debug!("[SESSION] Page visible, heartbeat resumed");
                self.record(ActionReport::page_visible()).await;
            }
            PageEvent::Unload => self.end_session_on_unload(),
        }
    }

    /// Ticks every heartbeat interval, the first one a full interval from now.
    /// Each tick runs in its own task so a slow report never delays the next.
    fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);
        let period = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tracker) = tracker.upgrade() else {
                    break;
                };
                tokio::spawn(async move { tracker.record_activity().await });
            }
        })
    }

    /// Heartbeat tick: end the session once idle past the inactivity timeout,
    /// otherwise send a liveness ping. Pings do not count as activity.
    async fn record_activity(&self) {
        let Some(session_id) = self.state.lock().session_id.clone() else {
            return;
        };
        if self.end_if_idle(&session_id) {
            return;
        }
        self.deliver(&session_id, &ActionReport::heartbeat()).await;
    }

    /// Returns `true` once `session_id` is no longer the live session, either
    /// because it was replaced or because it just ended for inactivity.
    ///
    /// The idle end goes through the beacon, nobody awaits the tick task.
    fn end_if_idle(&self, session_id: &str) -> bool {
        let idle = {
            let mut state = self.state.lock();
            if state.session_id.as_deref() != Some(session_id) {
                debug!("[SESSION] Session {} already replaced", session_id);
                return true;
            }
            let idle = state
                .last_activity
                .map(|last| last.elapsed())
                .unwrap_or_default();
            if idle <= self.config.inactivity_timeout {
                return false;
            }
            state.clear();
            idle
        };

        info!(
            "[SESSION] Session {} idle for {}s, ended",
            session_id,
            idle.as_secs()
        );
        if !self.beacon.send_end(session_id) {
            error!("[SESSION] Beacon rejected end of session {}", session_id);
        }
        true
    }

    async fn record(&self, report: ActionReport) {
        let session_id = {
            let mut state = self.state.lock();
            let Some(id) = state.session_id.clone() else {
                warn!("[SESSION] No active session, dropping {} action", report.action);
                return;
            };
            state.last_activity = Some(Instant::now());
            id
        };
        self.deliver(&session_id, &report).await;
    }

    async fn deliver(&self, session_id: &str, report: &ActionReport) {
        let sent = self.reporter.report_action(session_id, report);
        if self.bounded(sent).await.is_some() {
            debug!("[SESSION] Tracked {} for {}", report.action, session_id);
        } else {
            error!("[SESSION] Failed to track {} for {}", report.action, session_id);
        }
    }

    async fn end_session(&self) {
        let Some(session_id) = self.state.lock().clear() else {
            return;
        };
        info!("[SESSION] Ended session {}", session_id);
        self.notify_end(&session_id).await;
    }

    async fn notify_end(&self, session_id: &str) {
        let sent = self.reporter.end_session(session_id);
        if self.bounded(sent).await.is_none() {
            error!("[SESSION] Failed to end session {}", session_id);
        }
    }

    fn end_session_on_unload(&self) {
        let Some(session_id) = self.state.lock().clear() else {
            return;
        };
        if self.beacon.send_end(&session_id) {
            info!("[SESSION] Ended session {} on unload", session_id);
        } else {
            error!("[SESSION] Beacon rejected end of session {}", session_id);
        }
    }

    /// Run a report with the report timeout. `None` on error or timeout.
    async fn bounded<F>(&self, report: F) -> Option<()>
    where
        F: Future<Output = Result<()>>,
    {
        match timeout(self.config.report_timeout, report).await {
            Ok(Ok(())) => Some(()),
            Ok(Err(e)) => {
                warn!("[SESSION] Report failed: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "[SESSION] Report timed out after {}ms",
                    self.config.report_timeout.as_millis()
                );
                None
            }
        }
    }
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        self.state.get_mut().stop_heartbeat();
        if let Some(observer) = self.observer.get() {
            observer.abort();
        }
    }
}
