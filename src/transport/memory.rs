//! In-memory frame transport for exercising the realtime bridge in tests

use crate::transport::traits::{FrameTransport, TransportConnector};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use url::Url;

/// Server end of an accepted in-memory connection
pub(crate) struct ServerEnd {
    pub url: Url,
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    pub fn push(&self, frame: &str) {
        let _ = self.to_client.send(frame.to_string());
    }

    pub async fn next_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Engine.IO open followed by the namespace acknowledgement.
    /// Returns the client's namespace connect frame.
    pub async fn accept(&mut self, socket_id: &str) -> String {
        self.accept_with(socket_id, 25_000, 20_000).await
    }

    pub async fn accept_with(
        &mut self,
        socket_id: &str,
        ping_interval_ms: u64,
        ping_timeout_ms: u64,
    ) -> String {
        self.push(&format!(
            r#"0{{"sid":"engine-{}","upgrades":[],"pingInterval":{},"pingTimeout":{},"maxPayload":1000000}}"#,
            socket_id, ping_interval_ms, ping_timeout_ms
        ));
        let connect = self.next_frame().await.expect("client sent namespace connect");
        self.push(&format!(r#"40{{"sid":"{}"}}"#, socket_id));
        connect
    }
}

pub(crate) struct MemoryTransport {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.to_server
            .send(frame)
            .map_err(|_| anyhow!("server end dropped"))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.from_server.close();
        Ok(())
    }
}

/// Hands every accepted connection's server end to the test
pub(crate) struct MemoryConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    attempts: AtomicUsize,
    refuse: AtomicBool,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            accepted,
            attempts: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        };
        (connector, rx)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(&self, url: &Url) -> Result<Self::Transport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }

        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        self.accepted
            .send(ServerEnd {
                url: url.clone(),
                to_client,
                from_client,
            })
            .map_err(|_| anyhow!("test dropped the acceptor"))?;

        Ok(MemoryTransport {
            to_server,
            from_server,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
