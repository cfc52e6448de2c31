//! Teardown-surviving delivery of end-of-session signals
//!
//! Signals are handed to a dedicated worker thread that runs its own runtime,
//! so they are delivered even after the tracker, the task that queued them,
//! and the caller's runtime are gone. Dropping the beacon closes the queue
//! without waiting; the worker drains what is left and exits. A host that is
//! about to exit calls `flush` first.

use crate::config::ClientConfig;
use crate::transport::http::build_client;
use crate::transport::traits::Beacon;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, warn};
use url::Url;

/// Beacon that POSTs `{}` to `/student/session/{id}/end`
pub struct HttpBeacon {
    config: ClientConfig,
    queue: Mutex<Option<mpsc::UnboundedSender<Url>>>,
    drained: watch::Receiver<bool>,
}

impl HttpBeacon {
    /// Start the delivery worker
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = build_client(config.tracker.report_timeout)?;
        let (queue, mut pending) = mpsc::unbounded_channel::<Url>();
        let (drained_tx, drained) = watch::channel(false);

        std::thread::Builder::new()
            .name("session-beacon".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Beacon runtime failed to start: {}", e);
                        return;
                    }
                };

                runtime.block_on(async move {
                    while let Some(url) = pending.recv().await {
                        let result = client
                            .post(url.clone())
                            .json(&json!({}))
                            .send()
                            .await
                            .and_then(|response| response.error_for_status());
                        match result {
                            Ok(_) => debug!("Beacon delivered: {}", url),
                            Err(e) => warn!("Beacon delivery failed for {}: {}", url, e),
                        }
                    }
                });
                drained_tx.send_replace(true);
            })
            .context("Failed to spawn beacon worker")?;

        Ok(Self {
            config,
            queue: Mutex::new(Some(queue)),
            drained,
        })
    }

    /// One request in flight plus one queued behind it
    fn flush_timeout(&self) -> Duration {
        self.config.tracker.report_timeout.saturating_mul(2)
    }
}

#[async_trait]
impl Beacon for HttpBeacon {
    fn send_end(&self, session_id: &str) -> bool {
        let url = self.config.end_url(session_id);
        match self.queue.lock().as_ref() {
            Some(queue) => queue.send(url).is_ok(),
            None => false,
        }
    }

    async fn flush(&self) {
        self.queue.lock().take();
        let mut drained = self.drained.clone();
        let wait = async move { drained.wait_for(|done| *done).await.is_ok() };
        match timeout(self.flush_timeout(), wait).await {
            Ok(true) => debug!("Beacon queue drained"),
            Ok(false) => warn!("Beacon worker exited early"),
            Err(_) => warn!(
                "Beacon flush gave up after {}ms",
                self.flush_timeout().as_millis()
            ),
        }
    }
}

impl Drop for HttpBeacon {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain what is left and exit
        self.queue.get_mut().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_flush_delivers_queued_signal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/student/session/sess-9/end"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = ClientConfig::with_api_url(&format!("{}/api", server.uri())).unwrap();
        let beacon = HttpBeacon::new(config).unwrap();
        assert!(beacon.send_end("sess-9"));

        beacon.flush().await;
        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, b"{}");

        // Closed after a flush
        assert!(!beacon.send_end("sess-10"));
    }

    #[tokio::test]
    async fn test_drop_does_not_wait_for_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let config = ClientConfig::with_api_url(&format!("{}/api", server.uri())).unwrap();
        let beacon = HttpBeacon::new(config).unwrap();
        assert!(beacon.send_end("sess-11"));

        let started = Instant::now();
        drop(beacon);
        assert!(started.elapsed() < Duration::from_millis(500));

        // The worker still sends what was queued
        timeout(Duration::from_secs(5), async {
            while server.received_requests().await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queued signal was not sent");
    }

    #[test]
    fn test_delivery_outlives_caller_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let server = runtime.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;
            server
        });

        let config = ClientConfig::with_api_url(&format!("{}/api", server.uri())).unwrap();
        let beacon = HttpBeacon::new(config).unwrap();

        // Queue from a short-lived runtime that is gone before delivery is awaited
        let queuing = tokio::runtime::Runtime::new().unwrap();
        assert!(queuing.block_on(async { beacon.send_end("sess-10") }));
        drop(queuing);

        runtime.block_on(beacon.flush());
        let received = runtime.block_on(server.received_requests()).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].url.path(), "/api/student/session/sess-10/end");
    }
}
