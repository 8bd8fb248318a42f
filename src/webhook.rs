//! Outbound notifications for registry events
//!
//! Delivery is fire-and-forget: each matching hook gets its own task, failures
//! are logged and counted, nothing is retried and the triggering request never
//! sees the outcome.

use crate::model::Model;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Registry event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ModelUploaded,
    ModelDeleted,
}

impl EventKind {
    /// Events delivered to hooks that don't declare a filter
    pub fn default_events() -> &'static [EventKind] {
        &[EventKind::ModelUploaded]
    }
}

/// A subscriber URL and the events it wants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebHook {
    pub url: String,
    #[serde(default)]
    pub events: Vec<EventKind>,
}

impl WebHook {
    pub fn wants(&self, kind: EventKind) -> bool {
        if self.events.is_empty() {
            EventKind::default_events().contains(&kind)
        } else {
            self.events.contains(&kind)
        }
    }
}

/// Payload POSTed to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub event: EventKind,
    pub repo: String,
    pub model: Model,
    pub timestamp: DateTime<Utc>,
}

impl RegistryEvent {
    pub fn new(event: EventKind, model: Model) -> Self {
        Self {
            event,
            repo: model.repo.clone(),
            model,
            timestamp: Utc::now(),
        }
    }
}

/// Sends registry events to configured hooks
#[derive(Clone)]
pub struct WebHookDispatcher {
    hooks: Arc<[WebHook]>,
    client: reqwest::Client,
}

impl WebHookDispatcher {
    pub fn new(hooks: Vec<WebHook>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            hooks: hooks.into(),
            client,
        })
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Spawn one delivery per matching hook and return immediately.
    ///
    /// The handles are only useful to callers that want to wait for delivery.
    pub fn dispatch(&self, event: RegistryEvent) -> Vec<JoinHandle<()>> {
        let event = Arc::new(event);

        self.hooks
            .iter()
            .filter(|hook| hook.wants(event.event))
            .map(|hook| {
                let client = self.client.clone();
                let url = hook.url.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    deliver(&client, &url, &event).await;
                })
            })
            .collect()
    }
}

async fn deliver(client: &reqwest::Client, url: &str, event: &RegistryEvent) {
    let result = client.post(url).json(event).send().await;

    match result {
        Ok(response) if response.status().is_success() => {
            tracing::debug!(url = %url, event = ?event.event, "Webhook delivered");
        }
        Ok(response) => {
            tracing::warn!(
                url = %url,
                event = ?event.event,
                status = %response.status(),
                "Webhook rejected"
            );
            crate::metrics::record_webhook_failure(event.event);
        }
        Err(e) => {
            tracing::warn!(
                url = %url,
                event = ?event.event,
                error = %e,
                "Webhook delivery failed"
            );
            crate::metrics::record_webhook_failure(event.event);
        }
    }
}
