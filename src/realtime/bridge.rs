//! Push notifications for admin views over a Socket.IO connection

use super::listeners::{Listener, ListenerId};
use super::manager::{link_loop, LinkOptions, LinkShared};
use crate::config::{ClientConfig, RealtimeConfig, TransportKind};
use crate::transport::{TransportConnector, WebSocketConnector};
use anyhow::Result;
use nfc_profile_shared::{ClientEvent, EventKind, LinkState, ServerEvent, StudentStatus};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

struct Connection {
    id: u64,
    shared: Arc<LinkShared>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Handle to one logical connection, shared by every `connect` caller
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Connection>,
}

impl ConnectionHandle {
    /// Local sequence number, distinct for every connection the bridge creates
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Identifier assigned by the server on the most recent connect
    pub fn socket_id(&self) -> Option<String> {
        self.inner.shared.socket_id()
    }

    pub fn state(&self) -> LinkState {
        self.inner.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared.is_connected()
    }

    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Connecting, connected or waiting to reconnect
    fn is_live(&self) -> bool {
        !self.inner.task.is_finished() && !*self.inner.shutdown.borrow()
    }

    fn shutdown(&self) {
        self.inner.shared.close();
        self.inner.shutdown.send_replace(true);
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("socket_id", &self.socket_id())
            .field("state", &self.state())
            .finish()
    }
}

/// Owns at most one realtime connection and its listeners
pub struct RealtimeBridge<C: TransportConnector = WebSocketConnector> {
    connector: Arc<C>,
    url: Url,
    config: RealtimeConfig,
    connection: Mutex<Option<ConnectionHandle>>,
    next_id: AtomicU64,
}

impl RealtimeBridge<WebSocketConnector> {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let connector = WebSocketConnector::new(config.realtime.connect_timeout);
        Ok(Self::with_connector(
            Arc::new(connector),
            config.socket_io_url()?,
            config.realtime.clone(),
        ))
    }
}

impl<C: TransportConnector> RealtimeBridge<C> {
    pub fn with_connector(connector: Arc<C>, url: Url, config: RealtimeConfig) -> Self {
        if !config.transports.contains(&TransportKind::WebSocket) {
            warn!(
                "Only the websocket transport is available, ignoring {:?}",
                config.transports
            );
        }
        Self {
            connector,
            url,
            config,
            connection: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open the connection, or return the existing one while it is still live.
    ///
    /// Must be called from within a tokio runtime. Connection failures are
    /// logged and retried in the background, never returned.
    pub fn connect(&self, token: Option<&str>) -> ConnectionHandle {
        let mut slot = self.connection.lock();
        if let Some(existing) = slot.as_ref() {
            if existing.is_live() {
                debug!("Realtime connection {} already open", existing.id());
                return existing.clone();
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new(LinkShared::new());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let options = LinkOptions {
            url: self.url.clone(),
            auth: token.map(|token| json!({ "token": token })),
            policy: self.config.reconnect.clone(),
            connect_timeout: self.config.connect_timeout,
        };

        info!("Opening realtime connection {} to {}", id, self.url);
        let task = tokio::spawn(link_loop(
            self.connector.clone(),
            options,
            shared.clone(),
            outbound_rx,
            shutdown_rx,
        ));

        let handle = ConnectionHandle {
            inner: Arc::new(Connection {
                id,
                shared,
                outbound,
                shutdown,
                task,
            }),
        };
        if let Some(stale) = slot.replace(handle.clone()) {
            stale.shutdown();
        }
        handle
    }

    /// Tear the connection down and forget every listener
    pub fn disconnect(&self) {
        if let Some(handle) = self.connection.lock().take() {
            info!("Closing realtime connection {}", handle.id());
            handle.shutdown();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .map(ConnectionHandle::is_connected)
            .unwrap_or(false)
    }

    /// Current connection, if `connect` was called and not undone
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.connection.lock().clone()
    }

    /// Subscribe to an event. Returns `None` when there is no live connection.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Option<ListenerId>
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(callback);
        let slot = self.connection.lock();
        match slot.as_ref() {
            Some(handle) if handle.is_live() => {
                Some(handle.inner.shared.listeners.lock().add(kind, listener))
            }
            _ => {
                warn!("Cannot listen for {}: realtime bridge not connected", kind.name());
                None
            }
        }
    }

    /// Unsubscribe. Returns whether the listener was registered.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        match self.connection.lock().as_ref() {
            Some(handle) => handle.inner.shared.listeners.lock().remove(kind, id),
            None => false,
        }
    }

    /// Send an event to the server. While (re)connecting the event is queued
    /// and flushed once the link is up.
    pub fn emit(&self, event: ClientEvent) {
        let slot = self.connection.lock();
        let handle = match slot.as_ref() {
            Some(handle) if handle.is_live() => handle,
            _ => {
                warn!("Cannot emit {}: realtime bridge not connected", event.name());
                return;
            }
        };
        if !handle.is_connected() {
            debug!("Queueing {} until connected", event.name());
        }
        if handle.inner.outbound.send(event).is_err() {
            warn!("Realtime link closed, event dropped");
        }
    }

    pub fn on_student_scanned<F>(&self, callback: F) -> Option<ListenerId>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(EventKind::StudentScanned, move |event| {
            if let ServerEvent::StudentScanned(student) = event {
                callback(student);
            }
        })
    }

    pub fn on_student_added<F>(&self, callback: F) -> Option<ListenerId>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(EventKind::StudentAdded, move |event| {
            if let ServerEvent::StudentAdded(student) = event {
                callback(student);
            }
        })
    }

    pub fn on_student_updated<F>(&self, callback: F) -> Option<ListenerId>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(EventKind::StudentUpdated, move |event| {
            if let ServerEvent::StudentUpdated(student) = event {
                callback(student);
            }
        })
    }

    pub fn on_student_deleted<F>(&self, callback: F) -> Option<ListenerId>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(EventKind::StudentDeleted, move |event| {
            if let ServerEvent::StudentDeleted { student_id } = event {
                callback(student_id);
            }
        })
    }

    pub fn on_student_status_changed<F>(&self, callback: F) -> Option<ListenerId>
    where
        F: Fn(&StudentStatus) + Send + Sync + 'static,
    {
        self.on(EventKind::StudentStatusChanged, move |event| {
            if let ServerEvent::StudentStatusChanged(status) = event {
                callback(status);
            }
        })
    }

    pub fn on_school_added<F>(&self, callback: F) -> Option<ListenerId>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(EventKind::SchoolAdded, move |event| {
            if let ServerEvent::SchoolAdded(school) = event {
                callback(school);
            }
        })
    }

    pub fn on_school_updated<F>(&self, callback: F) -> Option<ListenerId>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(EventKind::SchoolUpdated, move |event| {
            if let ServerEvent::SchoolUpdated(school) = event {
                callback(school);
            }
        })
    }

    pub fn notify_student_scan(&self, student: Value) {
        self.emit(ClientEvent::StudentScan(student));
    }

    pub fn notify_student_added(&self, student: Value) {
        self.emit(ClientEvent::StudentAdded(student));
    }

    pub fn notify_student_updated(&self, student: Value) {
        self.emit(ClientEvent::StudentUpdated(student));
    }

    pub fn notify_student_deleted(&self, student_id: impl Into<String>) {
        self.emit(ClientEvent::StudentDeleted(student_id.into()));
    }

    pub fn notify_student_status_toggled(&self, status: StudentStatus) {
        self.emit(ClientEvent::StudentStatusToggled(status));
    }

    pub fn notify_school_added(&self, school: Value) {
        self.emit(ClientEvent::SchoolAdded(school));
    }

    pub fn notify_school_updated(&self, school: Value) {
        self.emit(ClientEvent::SchoolUpdated(school));
    }
}

impl<C: TransportConnector> Drop for RealtimeBridge<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.connection.get_mut().take() {
            handle.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryConnector, ServerEnd};
    use nfc_profile_shared::ReconnectPolicy;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn test_config(max_attempts: u32) -> RealtimeConfig {
        RealtimeConfig {
            reconnect: ReconnectPolicy {
                enabled: true,
                max_attempts,
                delay_ms: 10,
                max_delay_ms: 50,
            },
            connect_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn bridge_with(
        max_attempts: u32,
    ) -> (
        RealtimeBridge<MemoryConnector>,
        Arc<MemoryConnector>,
        mpsc::UnboundedReceiver<ServerEnd>,
    ) {
        let (connector, accepted) = MemoryConnector::new();
        let connector = Arc::new(connector);
        let url = Url::parse("ws://localhost:5000/socket.io/?EIO=4&transport=websocket").unwrap();
        let bridge = RealtimeBridge::with_connector(connector.clone(), url, test_config(max_attempts));
        (bridge, connector, accepted)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn next_server(accepted: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
        timeout(Duration::from_secs(5), accepted.recv())
            .await
            .expect("no connection attempt")
            .expect("connector dropped")
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&ServerEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move |_: &ServerEvent| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_connect_twice_returns_same_handle() {
        let (bridge, connector, mut accepted) = bridge_with(5);

        let first = bridge.connect(None);
        let mut server = next_server(&mut accepted).await;
        assert_eq!(server.accept("sock-1").await, "40");
        wait_until(|| bridge.is_connected()).await;

        let second = bridge.connect(None);
        assert!(first.same_connection(&second));
        assert_eq!(first.id(), second.id());
        assert_eq!(second.socket_id().as_deref(), Some("sock-1"));
        assert_eq!(second.state(), LinkState::Connected);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_connect_sends_auth_token() {
        let (bridge, _connector, mut accepted) = bridge_with(5);

        bridge.connect(Some("jwt-abc"));
        let mut server = next_server(&mut accepted).await;
        assert_eq!(server.url.path(), "/socket.io/");
        assert_eq!(server.accept("sock-1").await, r#"40{"token":"jwt-abc"}"#);
    }

    #[tokio::test]
    async fn test_pushed_events_reach_typed_listeners() {
        let (bridge, _connector, mut accepted) = bridge_with(5);
        bridge.connect(None);

        let deleted = Arc::new(Mutex::new(Vec::<String>::new()));
        let statuses = Arc::new(Mutex::new(Vec::<StudentStatus>::new()));
        let added = Arc::new(Mutex::new(Vec::<Value>::new()));
        {
            let deleted = deleted.clone();
            bridge
                .on_student_deleted(move |id| deleted.lock().push(id.to_string()))
                .unwrap();
            let statuses = statuses.clone();
            bridge
                .on_student_status_changed(move |s| statuses.lock().push(s.clone()))
                .unwrap();
            let added = added.clone();
            bridge
                .on_student_added(move |s| added.lock().push(s.clone()))
                .unwrap();
        }

        let mut server = next_server(&mut accepted).await;
        server.accept("sock-1").await;
        server.push(r#"42["student:added",{"studentId":"S-1","name":"Ada"}]"#);
        server.push(r#"42["student:deleted",{"studentId":"S-2"}]"#);
        server.push(r#"42["student:status-changed",{"studentId":"S-3","isActive":false}]"#);
        server.push(r#"42["unknown:event",{}]"#);

        wait_until(|| !statuses.lock().is_empty()).await;
        assert_eq!(added.lock()[0]["name"], "Ada");
        assert_eq!(*deleted.lock(), vec!["S-2".to_string()]);
        assert_eq!(
            statuses.lock()[0],
            StudentStatus {
                student_id: "S-3".into(),
                is_active: false
            }
        );
    }

    #[tokio::test]
    async fn test_off_stops_delivery() {
        let (bridge, _connector, mut accepted) = bridge_with(5);
        bridge.connect(None);

        let (removed_count, removed) = counter();
        let (kept_count, kept) = counter();
        let id = bridge.on(EventKind::SchoolAdded, removed).unwrap();
        bridge.on(EventKind::SchoolAdded, kept).unwrap();
        assert!(bridge.off(EventKind::SchoolAdded, id));
        assert!(!bridge.off(EventKind::SchoolAdded, id));

        let mut server = next_server(&mut accepted).await;
        server.accept("sock-1").await;
        server.push(r#"42["school:added",{"name":"North High"}]"#);

        wait_until(|| kept_count.load(Ordering::SeqCst) == 1).await;
        assert_eq!(removed_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnect_clears_listeners() {
        let (bridge, _connector, mut accepted) = bridge_with(5);
        bridge.connect(None);
        let (stale_count, stale) = counter();
        bridge.on(EventKind::StudentUpdated, stale).unwrap();

        let mut server = next_server(&mut accepted).await;
        server.accept("sock-1").await;
        wait_until(|| bridge.is_connected()).await;

        bridge.disconnect();
        assert!(!bridge.is_connected());
        assert!(bridge.handle().is_none());
        assert_eq!(server.next_frame().await.as_deref(), Some("41"));
        bridge.disconnect();

        // Same event name on a fresh connection
        let (fresh_count, fresh) = counter();
        bridge.connect(None);
        bridge.on(EventKind::StudentUpdated, fresh).unwrap();
        let mut server = next_server(&mut accepted).await;
        server.accept("sock-2").await;
        server.push(r#"42["student:updated",{"studentId":"S-1"}]"#);

        wait_until(|| fresh_count.load(Ordering::SeqCst) == 1).await;
        assert_eq!(stale_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_emit_frames_and_buffering() {
        let (bridge, _connector, mut accepted) = bridge_with(5);
        bridge.connect(None);

        // Queued while the handshake is still pending
        bridge.notify_student_deleted("S-9");

        let mut server = next_server(&mut accepted).await;
        server.accept("sock-1").await;
        assert_eq!(
            server.next_frame().await.as_deref(),
            Some(r#"42["admin:student-deleted","S-9"]"#)
        );

        bridge.notify_student_status_toggled(StudentStatus {
            student_id: "S-1".into(),
            is_active: true,
        });
        let frame = server.next_frame().await.unwrap();
        assert_eq!(
            nfc_profile_shared::codec::decode(&frame).unwrap(),
            nfc_profile_shared::codec::Packet::event(
                "admin:student-status-toggled",
                json!({ "studentId": "S-1", "isActive": true })
            )
        );

        bridge.notify_student_scan(json!({ "studentId": "S-1" }));
        assert_eq!(
            server.next_frame().await.as_deref(),
            Some(r#"42["student:scan",{"studentId":"S-1"}]"#)
        );
    }

    #[tokio::test]
    async fn test_misuse_without_connection_is_noop() {
        let (bridge, connector, _accepted) = bridge_with(5);

        assert!(bridge.on(EventKind::StudentAdded, |_| {}).is_none());
        assert!(bridge.on_school_updated(|_| {}).is_none());
        bridge.notify_school_added(json!({ "name": "West" }));
        bridge.disconnect();

        assert!(!bridge.is_connected());
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let (bridge, _connector, mut accepted) = bridge_with(5);
        bridge.connect(None);
        let mut server = next_server(&mut accepted).await;
        server.accept("sock-1").await;

        server.push("2");
        assert_eq!(server.next_frame().await.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_server_disconnect_does_not_reconnect() {
        let (bridge, connector, mut accepted) = bridge_with(5);
        let handle = bridge.connect(None);

        let reasons = Arc::new(Mutex::new(Vec::<String>::new()));
        {
            let reasons = reasons.clone();
            bridge.on(EventKind::Disconnect, move |event| {
                if let ServerEvent::Disconnect { reason } = event {
                    reasons.lock().push(reason.clone());
                }
            });
        }

        let mut server = next_server(&mut accepted).await;
        server.accept("sock-1").await;
        wait_until(|| bridge.is_connected()).await;
        server.push("41");

        wait_until(|| handle.state() == LinkState::Disconnected).await;
        assert_eq!(*reasons.lock(), vec!["io server disconnect".to_string()]);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempts(), 1);

        // The finished connection is replaced on the next connect
        let next = bridge.connect(None);
        assert!(!next.same_connection(&handle));
    }

    #[tokio::test]
    async fn test_reconnects_after_transport_loss() {
        let (bridge, connector, mut accepted) = bridge_with(5);
        let handle = bridge.connect(None);
        let (connects, on_connect) = counter();
        bridge.on(EventKind::Connect, on_connect).unwrap();

        let mut server = next_server(&mut accepted).await;
        server.accept("sock-1").await;
        wait_until(|| connects.load(Ordering::SeqCst) == 1).await;
        drop(server);

        let mut server = next_server(&mut accepted).await;
        server.accept("sock-2").await;
        wait_until(|| connects.load(Ordering::SeqCst) == 2).await;

        assert_eq!(connector.attempts(), 2);
        assert_eq!(handle.socket_id().as_deref(), Some("sock-2"));
        assert!(bridge.connect(None).same_connection(&handle));
    }

    #[tokio::test]
    async fn test_ping_timeout_triggers_reconnect() {
        let (bridge, connector, mut accepted) = bridge_with(5);
        bridge.connect(None);

        let mut server = next_server(&mut accepted).await;
        server.accept_with("sock-1", 20, 20).await;
        wait_until(|| bridge.is_connected()).await;

        // No pings: the link gives up after 40ms and dials again
        let mut server = next_server(&mut accepted).await;
        server.accept("sock-2").await;
        wait_until(|| bridge.is_connected()).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_connect_error_is_reported_and_retried() {
        let (bridge, connector, mut accepted) = bridge_with(5);
        bridge.connect(Some("expired"));
        let errors = Arc::new(Mutex::new(Vec::<String>::new()));
        {
            let errors = errors.clone();
            bridge.on(EventKind::ConnectError, move |event| {
                if let ServerEvent::ConnectError { message } = event {
                    errors.lock().push(message.clone());
                }
            });
        }

        let mut server = next_server(&mut accepted).await;
        server.push(r#"0{"sid":"e1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#);
        server.next_frame().await;
        server.push(r#"44{"message":"Authentication error"}"#);

        wait_until(|| !errors.lock().is_empty()).await;
        assert!(errors.lock()[0].contains("Authentication error"));
        next_server(&mut accepted).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_reconnection_gives_up() {
        let (bridge, connector, mut accepted) = bridge_with(2);
        connector.set_refuse(true);

        let handle = bridge.connect(None);
        wait_until(|| handle.state() == LinkState::Disconnected && connector.attempts() == 3)
            .await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempts(), 3);
        assert!(!bridge.is_connected());

        // A finished connection accepts neither emits nor listeners
        bridge.notify_student_added(json!({}));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempts(), 3);
        assert!(accepted.try_recv().is_err());
        assert!(bridge.on(EventKind::StudentAdded, |_| {}).is_none());
    }
}
