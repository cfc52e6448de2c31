//! HTTP delivery of session action and end reports

use crate::config::ClientConfig;
use crate::transport::traits::ActionReporter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use nfc_profile_shared::ActionReport;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Posts reports to `/student/session/{id}/…` on the API base
pub struct HttpReporter {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpReporter {
    /// Create a reporter whose requests time out after the configured report timeout
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = build_client(config.tracker.report_timeout)?;
        Ok(Self { client, config })
    }
}

/// JSON client with a bounded per-request timeout
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

#[async_trait]
impl ActionReporter for HttpReporter {
    async fn report_action(&self, session_id: &str, report: &ActionReport) -> Result<()> {
        let url = self.config.action_url(session_id);
        self.client
            .post(url)
            .json(report)
            .send()
            .await?
            .error_for_status()?;
        debug!("Delivered {} report for session {}", report.action, session_id);
        Ok(())
    }

    async fn end_session(&self, session_id: &str) -> Result<()> {
        let url = self.config.end_url(session_id);
        self.client
            .post(url)
            .json(&json!({}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn reporter_for(server: &MockServer) -> HttpReporter {
        let config = ClientConfig::with_api_url(&format!("{}/api", server.uri())).unwrap();
        HttpReporter::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_report_action_posts_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/student/session/sess-123/action"))
            .and(body_json(json!({ "action": "call", "details": "Called +15551234567" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        let reporter = reporter_for(&server).await;
        reporter
            .report_action("sess-123", &ActionReport::call("+15551234567"))
            .await
            .expect("report should succeed");
    }

    #[tokio::test]
    async fn test_end_session_posts_empty_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/student/session/sess-123/end"))
            .and(body_json(json!({})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let reporter = reporter_for(&server).await;
        reporter.end_session("sess-123").await.expect("end should succeed");
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let reporter = reporter_for(&server).await;
        let result = reporter.report_action("sess-123", &ActionReport::share()).await;
        assert!(result.is_err());
    }
}
