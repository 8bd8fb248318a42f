//! Access checks delegated to an external authority over HTTP

use super::{AccessControl, AccessDecision, AccessError, AccessRequest};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Asks `{authority}/v1/repos/{user}/{name}/check-{read|write}`
///
/// 200 allows; 401, 403 and 404 deny; anything else is an error.
pub struct RemoteAccessControl {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteAccessControl {
    pub fn new(base_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build access control HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn check_url(&self, request: &AccessRequest) -> String {
        format!(
            "{}/v1/repos/{}/{}/check-{}",
            self.base_url,
            urlencoding::encode(&request.repo.user),
            urlencoding::encode(&request.repo.name),
            request.permission
        )
    }
}

#[async_trait]
impl AccessControl for RemoteAccessControl {
    async fn check(&self, request: &AccessRequest) -> Result<AccessDecision, AccessError> {
        let url = self.check_url(request);
        let mut req = self.client.get(&url);
        if let Some(token) = &request.token {
            req = req.bearer_auth(token);
        }

        let response = req
            .send()
            .await
            .map_err(|e| AccessError::Unreachable(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(AccessDecision::Allowed),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                Ok(AccessDecision::Denied)
            }
            other => Err(AccessError::UnexpectedResponse(format!(
                "{} returned {}",
                url, other
            ))),
        }
    }

    fn name(&self) -> &str {
        "remote"
    }
}
