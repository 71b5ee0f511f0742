//! Fastly edge client.

use async_trait::async_trait;
use docsmith_config::CdnConfig;
use docsmith_core::edge::EdgeClient;
use docsmith_core::{Error, Result};
use tracing::debug;

const SURROGATE_KEY_HEADER: &str = "surrogate-key";

/// Edge client for the Fastly API.
pub struct FastlyClient {
    client: reqwest::Client,
    api_base: String,
    service_id: String,
    api_key: String,
}

impl FastlyClient {
    /// Build a client from configuration. Returns `None` when no service id
    /// or API key is configured.
    pub fn from_config(config: &CdnConfig) -> Result<Option<Self>> {
        let (Some(service_id), Some(api_key)) = (&config.service_id, &config.api_key) else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent("docsmith-worker")
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Some(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            service_id: service_id.clone(),
            api_key: api_key.clone(),
        }))
    }

    fn purge_url(&self, surrogate_key: &str) -> String {
        format!(
            "{}/service/{}/purge/{}",
            self.api_base,
            self.service_id,
            urlencoding::encode(surrogate_key)
        )
    }

    async fn post_purge(&self, surrogate_key: &str) -> Result<()> {
        let response = self
            .client
            .post(self.purge_url(surrogate_key))
            .header("Fastly-Key", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::Cdn(format!("purge request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Cdn(format!(
                "purge of {} rejected ({}): {}",
                surrogate_key, status, text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EdgeClient for FastlyClient {
    fn name(&self) -> &'static str {
        "fastly"
    }

    async fn surrogate_key(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("Fastly-Debug", "1")
            .send()
            .await
            .map_err(|e| Error::Cdn(format!("key lookup for {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Cdn(format!(
                "key lookup for {} returned {}",
                url,
                response.status()
            )));
        }

        response
            .headers()
            .get(SURROGATE_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::Cdn(format!("no surrogate key for {}", url)))
    }

    async fn purge_key(&self, surrogate_key: &str) -> Result<()> {
        debug!(surrogate_key, "Purging surrogate key");
        self.post_purge(surrogate_key).await
    }

    async fn warm(&self, url: &str) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Cdn(format!("warm request for {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Cdn(format!(
                "warm request for {} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }

    async fn purge_scope(&self, scope: &str) -> Result<()> {
        debug!(scope, "Purging scope");
        self.post_purge(scope).await
    }
}
