//! Job notification sinks.

use async_trait::async_trait;
use docsmith_core::notify::Notifier;
use docsmith_core::{Error, Job, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Serialize)]
struct SlackMessage {
    text: String,
}

/// Posts job notifications to a Slack incoming webhook.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }

    fn message(job: &Job, text: &str) -> SlackMessage {
        SlackMessage {
            text: format!(
                "*{}* ({} `{}`, requested by {})\n{}",
                job.title,
                job.payload.full_repo_name(),
                job.payload.branch_name,
                job.user,
                text
            ),
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify(&self, job: &Job, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&Self::message(job, message))
            .send()
            .await
            .map_err(|e| Error::Internal(format!("slack request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "slack rejected notification ({}): {}",
                status, text
            )));
        }
        Ok(())
    }
}

/// Writes notifications to the log only. Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, job: &Job, message: &str) -> Result<()> {
        info!(job_id = %job.id, user = %job.user, "{}", message);
        Ok(())
    }
}
