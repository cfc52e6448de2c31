//! Link loop with the Socket.IO handshake and automatic reconnection

use super::listeners::ListenerRegistry;
use crate::transport::{FrameTransport, TransportConnector};
use anyhow::{anyhow, Result};
use nfc_profile_shared::codec::{self, Handshake, Packet};
use nfc_profile_shared::{
    ClientEvent, LinkEvent, LinkState, LinkStateMachine, ReconnectPolicy, ServerEvent,
    TransitionResult,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

/// State shared between a connection handle and its link loop
pub(crate) struct LinkShared {
    connected: AtomicBool,
    closed: AtomicBool,
    state: RwLock<LinkState>,
    socket_id: RwLock<Option<String>>,
    pub(crate) listeners: Mutex<ListenerRegistry>,
}

impl LinkShared {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state: RwLock::new(LinkState::Connecting),
            socket_id: RwLock::new(None),
            listeners: Mutex::new(ListenerRegistry::default()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    pub fn socket_id(&self) -> Option<String> {
        self.socket_id.read().clone()
    }

    /// Stop dispatching and drop every listener
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        let mut listeners = self.listeners.lock();
        debug!("Dropping {} realtime listeners", listeners.len());
        listeners.clear();
    }

    fn set_state(&self, state: LinkState) {
        *self.state.write() = state;
    }

    fn mark_connected(&self, socket_id: &str) {
        *self.socket_id.write() = Some(socket_id.to_string());
        self.set_state(LinkState::Connected);
        if !self.closed.load(Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
        }
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn dispatch(&self, event: &ServerEvent) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let listeners = self.listeners.lock().snapshot(event.kind());
        for listener in listeners {
            listener(event);
        }
    }
}

/// Where and how the link connects
pub(crate) struct LinkOptions {
    pub url: Url,
    pub auth: Option<Value>,
    pub policy: ReconnectPolicy,
    pub connect_timeout: Duration,
}

/// Why an established session ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum DisconnectReason {
    ClientDisconnect,
    ServerDisconnect,
    TransportClose,
    TransportError(String),
    PingTimeout,
}

impl DisconnectReason {
    /// A namespace disconnect from either side is final
    fn reconnects(&self) -> bool {
        !matches!(
            self,
            DisconnectReason::ClientDisconnect | DisconnectReason::ServerDisconnect
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientDisconnect => write!(f, "io client disconnect"),
            DisconnectReason::ServerDisconnect => write!(f, "io server disconnect"),
            DisconnectReason::TransportClose => write!(f, "transport close"),
            DisconnectReason::TransportError(e) => write!(f, "transport error: {}", e),
            DisconnectReason::PingTimeout => write!(f, "ping timeout"),
        }
    }
}

/// Main link loop with reconnection logic
pub(crate) async fn link_loop<C: TransportConnector>(
    connector: Arc<C>,
    options: LinkOptions,
    shared: Arc<LinkShared>,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut fsm = LinkStateMachine::new(options.policy.clone());
    fsm.process_event(LinkEvent::ConnectRequested);
    shared.set_state(fsm.state());

    loop {
        if *shutdown.borrow() {
            break;
        }

        let attempt = tokio::select! {
            _ = shutdown.changed() => break,
            result = timeout(options.connect_timeout, open_session(connector.as_ref(), &options)) => {
                result.unwrap_or_else(|_| Err(anyhow!("Handshake timed out")))
            }
        };

        let transition = match attempt {
            Ok((mut transport, socket_id, handshake)) => {
                fsm.process_event(LinkEvent::Connected);
                shared.mark_connected(&socket_id);
                info!("Realtime connected via {}: {}", connector.name(), socket_id);
                shared.dispatch(&ServerEvent::Connect { socket_id });

                let reason = run_session(
                    &mut transport,
                    &handshake,
                    &shared,
                    &mut outbound_rx,
                    &mut shutdown,
                )
                .await;

                shared.mark_disconnected();
                info!("Realtime disconnected: {}", reason);
                shared.dispatch(&ServerEvent::Disconnect {
                    reason: reason.to_string(),
                });

                if reason.reconnects() {
                    fsm.process_event(LinkEvent::ConnectionLost)
                } else {
                    fsm.process_event(LinkEvent::Closed)
                }
            }
            Err(e) => {
                error!("Realtime connection error: {}", e);
                shared.dispatch(&ServerEvent::ConnectError {
                    message: e.to_string(),
                });
                fsm.process_event(LinkEvent::ConnectFailed)
            }
        };
        shared.set_state(fsm.state());

        match transition {
            TransitionResult::Reconnect { attempt, delay_ms } => {
                info!(
                    "Reconnecting in {}ms (attempt {}/{})",
                    delay_ms, attempt, options.policy.max_attempts
                );
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = sleep(Duration::from_millis(delay_ms)) => {}
                }
            }
            TransitionResult::Exhausted { attempts } => {
                warn!("Realtime reconnection gave up after {} attempts", attempts);
                break;
            }
            _ => break,
        }
    }

    shared.mark_disconnected();
    shared.set_state(LinkState::Disconnected);
    debug!("Realtime link loop stopped");
}

/// Connect the transport and complete the Engine.IO and namespace handshakes
async fn open_session<C: TransportConnector>(
    connector: &C,
    options: &LinkOptions,
) -> Result<(C::Transport, String, Handshake)> {
    let mut transport = connector.connect(&options.url).await?;

    let handshake = match next_packet(&mut transport).await? {
        Packet::Open(handshake) => handshake,
        other => return Err(anyhow!("Expected open handshake, got {:?}", other)),
    };

    transport
        .send(codec::encode(&Packet::Connect(options.auth.clone()))?)
        .await?;

    loop {
        match next_packet(&mut transport).await? {
            Packet::Connect(data) => {
                let socket_id = data
                    .as_ref()
                    .and_then(|d| d.get("sid"))
                    .and_then(Value::as_str)
                    .unwrap_or(handshake.sid.as_str())
                    .to_string();
                return Ok((transport, socket_id, handshake));
            }
            Packet::ConnectError(data) => {
                let message = data
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| data.to_string());
                return Err(anyhow!("Connection refused: {}", message));
            }
            Packet::Ping => transport.send(codec::encode(&Packet::Pong)?).await?,
            other => debug!("Ignoring {:?} during handshake", other),
        }
    }
}

async fn next_packet<T: FrameTransport>(transport: &mut T) -> Result<Packet> {
    let frame = transport
        .recv()
        .await
        .ok_or_else(|| anyhow!("Transport closed during handshake"))??;
    Ok(codec::decode(&frame)?)
}

enum Step {
    Shutdown,
    Frame(Option<Result<String>>),
    Outbound(Option<ClientEvent>),
    PingTimeout,
}

/// Handle an established session until it ends
async fn run_session<T: FrameTransport>(
    transport: &mut T,
    handshake: &Handshake,
    shared: &LinkShared,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> DisconnectReason {
    // The server pings every `pingInterval`; silence past the grace period means a dead link
    let ping_window = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let mut ping_deadline = Instant::now() + ping_window;

    loop {
        let step = tokio::select! {
            _ = shutdown.changed() => Step::Shutdown,
            frame = transport.recv() => Step::Frame(frame),
            event = outbound_rx.recv() => Step::Outbound(event),
            _ = sleep_until(ping_deadline) => Step::PingTimeout,
        };

        match step {
            Step::Shutdown | Step::Outbound(None) => {
                if let Ok(frame) = codec::encode(&Packet::Disconnect) {
                    let _ = transport.send(frame).await;
                }
                if let Err(e) = transport.close().await {
                    debug!("Transport close failed: {}", e);
                }
                return DisconnectReason::ClientDisconnect;
            }
            Step::PingTimeout => {
                let _ = transport.close().await;
                return DisconnectReason::PingTimeout;
            }
            Step::Outbound(Some(event)) => {
                let frame = match codec::encode(&Packet::event(event.name(), event.payload())) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("Failed to encode {}: {}", event.name(), e);
                        continue;
                    }
                };
                if let Err(e) = transport.send(frame).await {
                    return DisconnectReason::TransportError(e.to_string());
                }
                debug!("Emitted {}", event.name());
            }
            Step::Frame(None) => return DisconnectReason::TransportClose,
            Step::Frame(Some(Err(e))) => return DisconnectReason::TransportError(e.to_string()),
            Step::Frame(Some(Ok(frame))) => match codec::decode(&frame) {
                Ok(Packet::Ping) => {
                    ping_deadline = Instant::now() + ping_window;
                    let pong = codec::encode(&Packet::Pong).unwrap_or_else(|_| "3".into());
                    if let Err(e) = transport.send(pong).await {
                        return DisconnectReason::TransportError(e.to_string());
                    }
                }
                Ok(Packet::Event { name, data }) => handle_event(shared, &name, data),
                Ok(Packet::Disconnect) => {
                    let _ = transport.close().await;
                    return DisconnectReason::ServerDisconnect;
                }
                Ok(Packet::Close) => return DisconnectReason::TransportClose,
                Ok(other) => debug!("Ignoring {:?}", other),
                Err(e) => warn!("Dropping malformed frame: {}", e),
            },
        }
    }
}

fn handle_event(shared: &LinkShared, name: &str, data: Value) {
    match ServerEvent::from_wire(name, data) {
        Ok(Some(event)) => {
            if let ServerEvent::AdminConnected { username } = &event {
                info!("Admin connected: {}", username);
            }
            shared.dispatch(&event);
        }
        Ok(None) => debug!("Ignoring unknown event {}", name),
        Err(e) => warn!("{}", e),
    }
}
