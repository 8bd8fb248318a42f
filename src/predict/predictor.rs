//! Lifecycle of one model container and the prediction call over it

use super::port::allocate_port;
use super::readiness::{Probe, Readiness, StartupFailure, evaluate};
use super::runtime::{ContainerRuntime, LogSink, RunOptions};
use super::schema::InterfaceSchema;
use super::types::{Inputs, PredictionOutcome, PredictionRequest};
use crate::config::PredictorConfig;
use crate::error::{PredictError, PredictResult};
use anyhow::Context;
use reqwest::header::CONNECTION;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Upper bound on a single readiness probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Environment variable set in the container when debugging is enabled
pub const DEBUG_ENV: &str = "MODELBOX_DEBUG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorState {
    Created,
    Starting,
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for PredictorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Owns one container. Not shared between callers: lifecycle methods take `&mut self`.
pub struct Predictor {
    image: String,
    env: Vec<(String, String)>,
    config: PredictorConfig,
    runtime: Arc<dyn ContainerRuntime>,
    /// No idle connections are kept; every call opens a fresh one
    client: reqwest::Client,
    probe_client: reqwest::Client,
    state: PredictorState,
    container_id: Option<String>,
    port: Option<u16>,
    log_task: Option<JoinHandle<()>>,
}

impl Predictor {
    pub fn new(
        image: impl Into<String>,
        config: PredictorConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .context("Failed to build prediction HTTP client")?;
        let probe_client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .timeout(PROBE_TIMEOUT)
            .build()
            .context("Failed to build readiness probe HTTP client")?;

        let mut env = Vec::new();
        if config.debug {
            env.push((DEBUG_ENV.to_string(), "1".to_string()));
        }

        Ok(Self {
            image: image.into(),
            env,
            config,
            runtime,
            client,
            probe_client,
            state: PredictorState::Created,
            container_id: None,
            port: None,
            log_task: None,
        })
    }

    /// Extra environment for the container
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn state(&self) -> PredictorState {
        self.state
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    fn base_url(&self, port: u16) -> String {
        format!("http://{}:{}", self.config.host, port)
    }

    /// Launch the container and wait until it answers on `/`.
    ///
    /// Output is forwarded to `logs` by a background task for the
    /// container's lifetime.
    pub async fn start(&mut self, logs: Arc<dyn LogSink>) -> PredictResult<()> {
        if self.state != PredictorState::Created {
            return Err(PredictError::AlreadyStarted {
                state: self.state.to_string(),
            });
        }
        self.state = PredictorState::Starting;

        match self.launch(logs).await {
            Ok(()) => {
                self.state = PredictorState::Running;
                tracing::info!(
                    image = %self.image,
                    port = ?self.port,
                    "Container ready"
                );
                Ok(())
            }
            Err(e) => {
                self.state = PredictorState::Failed;
                tracing::error!(image = %self.image, error = %e, "Container failed to start");
                Err(e)
            }
        }
    }

    async fn launch(&mut self, logs: Arc<dyn LogSink>) -> PredictResult<()> {
        let port = allocate_port(self.config.port_range())?;
        self.port = Some(port);

        let options = RunOptions {
            image: self.image.clone(),
            host_port: port,
            container_port: self.config.container_port,
            env: self.env.clone(),
        };
        let id = self
            .runtime
            .run_daemon(&options)
            .await
            .map_err(PredictError::ContainerStart)?;
        self.container_id = Some(id.clone());

        tracing::info!(image = %self.image, container_id = %id, port = port, "Container launched");

        let runtime = self.runtime.clone();
        let log_id = id.clone();
        self.log_task = Some(tokio::spawn(async move {
            if let Err(e) = runtime.follow_logs(&log_id, logs.clone()).await {
                tracing::warn!(container_id = %log_id, error = %e, "Error getting container logs");
                logs.stream_failed(&e);
            }
        }));

        self.wait_until_ready(&id, port).await
    }

    async fn wait_until_ready(&self, id: &str, port: u16) -> PredictResult<()> {
        let url = format!("{}/", self.base_url(port));
        let timeout = self.config.startup_timeout();
        let started = Instant::now();

        loop {
            tokio::time::sleep(self.config.poll_interval()).await;

            let state = self
                .runtime
                .inspect(id)
                .await
                .map_err(PredictError::ContainerInspect)?;
            let probe = if state.is_terminal() {
                None
            } else {
                Some(self.probe(&url).await)
            };

            match evaluate(started.elapsed(), timeout, &state, probe) {
                Readiness::Continue => {
                    tracing::trace!(container_id = %id, state = %state, probe = ?probe, "Not ready");
                }
                Readiness::Ready => return Ok(()),
                Readiness::Failed(StartupFailure::Timeout(limit)) => {
                    return Err(PredictError::ReadinessTimeout(limit));
                }
                Readiness::Failed(StartupFailure::Crashed(state)) => {
                    return Err(PredictError::ContainerCrashed {
                        status: state.to_string(),
                    });
                }
            }
        }
    }

    async fn probe(&self, url: &str) -> Probe {
        match self.probe_client.get(url).send().await {
            Ok(response) => Probe::Status(response.status().as_u16()),
            Err(_) => Probe::Unreachable,
        }
    }

    fn running_port(&self) -> PredictResult<u16> {
        match (self.state, self.port) {
            (PredictorState::Running, Some(port)) => Ok(port),
            (state, _) => Err(PredictError::NotRunning {
                state: state.to_string(),
            }),
        }
    }

    /// Run one prediction.
    ///
    /// A 400 from the container comes back as [`PredictError::BadRequest`],
    /// never as [`PredictionOutcome::BadRequest`].
    pub async fn predict(&self, inputs: &Inputs) -> PredictResult<PredictionOutcome> {
        let port = self.running_port()?;
        let url = format!("{}/predictions", self.base_url(port));
        let request = PredictionRequest {
            input: inputs.to_wire().await?,
        };

        let result = self.post_prediction(&url, &request).await;
        crate::metrics::record_prediction(outcome_label(&result));

        match result? {
            PredictionOutcome::BadRequest { message } => Err(PredictError::BadRequest { message }),
            outcome => Ok(outcome),
        }
    }

    async fn post_prediction(
        &self,
        url: &str,
        request: &PredictionRequest,
    ) -> PredictResult<PredictionOutcome> {
        let response = self
            .client
            .post(url)
            .header(CONNECTION, "close")
            .json(request)
            .send()
            .await
            .map_err(|source| PredictError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|source| PredictError::Transport {
                url: url.to_string(),
                source,
            })?;

        PredictionOutcome::decode(status, &body)
    }

    /// Fetch the container's OpenAPI document
    pub async fn schema(&self) -> PredictResult<InterfaceSchema> {
        let port = self.running_port()?;
        let url = format!("{}/openapi.json", self.base_url(port));

        let response = self
            .client
            .get(&url)
            .header(CONNECTION, "close")
            .send()
            .await
            .map_err(|source| PredictError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PredictError::SchemaFetch(format!(
                "{} returned status {}",
                url, status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| PredictError::Transport { url, source })?;
        InterfaceSchema::from_slice(&body)
    }

    /// Stop the container and the log task. Does nothing if no container was launched
    /// or it was already stopped.
    pub async fn stop(&mut self) -> PredictResult<()> {
        let Some(id) = self.container_id.take() else {
            return Ok(());
        };

        if let Some(task) = self.log_task.take() {
            task.abort();
        }

        let result = self.runtime.stop(&id).await;
        self.state = PredictorState::Stopped;

        match result {
            Ok(()) => {
                tracing::info!(container_id = %id, "Container stopped");
                Ok(())
            }
            Err(e) => Err(PredictError::ContainerStop(e)),
        }
    }
}

impl Drop for Predictor {
    fn drop(&mut self) {
        if let Some(task) = self.log_task.take() {
            task.abort();
        }
        if let Some(id) = &self.container_id {
            tracing::warn!(container_id = %id, "Predictor dropped without stop; container left running");
        }
    }
}

fn outcome_label(result: &PredictResult<PredictionOutcome>) -> &'static str {
    match result {
        Ok(PredictionOutcome::Success { .. }) => "success",
        Ok(PredictionOutcome::Failure { .. }) => "failure",
        Ok(PredictionOutcome::Pending { .. }) => "pending",
        Ok(PredictionOutcome::BadRequest { .. }) => "bad_request",
        Err(_) => "error",
    }
}
