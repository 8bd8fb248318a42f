//! Deployment through a serving platform's HTTP endpoint

use super::ServingPlatform;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct DeployRequest<'a> {
    image: &'a str,
    version: &'a str,
}

/// POSTs `{image, version}` to the configured deploy endpoint
pub struct HttpServingPlatform {
    url: String,
    client: reqwest::Client,
}

impl HttpServingPlatform {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build serving platform HTTP client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ServingPlatform for HttpServingPlatform {
    async fn deploy(&self, tag: &str, hash: &str) -> Result<()> {
        tracing::info!(tag = %tag, endpoint = %self.url, "Deploying image");

        let response = self
            .client
            .post(&self.url)
            .json(&DeployRequest {
                image: tag,
                version: hash,
            })
            .send()
            .await
            .with_context(|| format!("Failed to reach serving platform at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Serving platform returned {}: {}", status, body);
        }
        Ok(())
    }
}
