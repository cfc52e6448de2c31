//! Public student profile fetch

use crate::config::ClientConfig;
use crate::session::SessionTracker;
use crate::transport::http::build_client;
use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

const DEFAULT_ERROR: &str = "Failed to load student profile";

/// Body of `GET /student/{id}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    #[serde(default)]
    pub data: Value,
    /// Tracking session opened by the server for this view
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

pub struct ProfileClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ProfileClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = build_client(config.tracker.report_timeout)?;
        Ok(Self { client, config })
    }

    /// Fetch a profile. Non-2xx responses fail with the server's `message`.
    pub async fn fetch_student(&self, student_id: &str) -> Result<StudentProfile> {
        if student_id.trim().is_empty() {
            bail!("No student ID provided");
        }

        let response = self
            .client
            .get(self.config.student_url(student_id))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| DEFAULT_ERROR.to_string());
            return Err(anyhow!("{} ({})", message, status));
        }

        Ok(response.json().await?)
    }

    /// Fetch a profile and start tracking the view when the server opened a session
    pub async fn open_student_profile(
        &self,
        student_id: &str,
        tracker: &SessionTracker,
    ) -> Result<StudentProfile> {
        let profile = self.fetch_student(student_id).await.map_err(|e| {
            error!("Error fetching student {}: {}", student_id, e);
            e
        })?;

        match profile.session_id.as_deref() {
            Some(session_id) if !session_id.is_empty() => {
                tracker.start_session(session_id).await;
            }
            _ => info!("Profile {} returned no session, not tracking", student_id),
        }

        Ok(profile)
    }
}
