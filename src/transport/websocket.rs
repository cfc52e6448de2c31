//! WebSocket transport for the realtime bridge

use crate::transport::traits::{FrameTransport, TransportConnector};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket stream wrapper implementing FrameTransport
pub struct WebSocketTransport {
    inner: WsStream,
}

impl WebSocketTransport {
    pub fn new(stream: WsStream) -> Self {
        Self { inner: stream }
    }
}

#[async_trait]
impl FrameTransport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.inner.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => return None,
                // Control frames are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close(None).await?;
        Ok(())
    }
}

/// Connector for `ws://` and `wss://` endpoints
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self, url: &Url) -> Result<Self::Transport> {
        let (stream, _response) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| anyhow!("Timed out connecting to {}", url))??;
        Ok(WebSocketTransport::new(stream))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
