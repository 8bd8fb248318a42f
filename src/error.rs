//! Error types for the registry API and the predictor

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;
pub type PredictResult<T> = Result<T, PredictError>;

/// Which half of a delete went through before the failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStage {
    /// Bundle could not be removed; the catalogue entry is untouched
    Storage,
    /// Bundle removed but the catalogue entry remains
    Database,
}

impl std::fmt::Display for DeleteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage => write!(f, "storage"),
            Self::Database => write!(f, "database"),
        }
    }
}

/// Registry errors, one variant per pipeline stage
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Access denied to {repo}")]
    AccessDenied { repo: String },

    #[error("Model {id} not found in {repo}")]
    NotFound { repo: String, id: String },

    #[error("Invalid bundle: {0}")]
    BundleParse(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Bundle exceeds maximum size of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("Failed to build image {tag}: {source:#}")]
    Build {
        tag: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to deploy image {tag}: {source:#}")]
    Deploy {
        tag: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Storage failure: {0:#}")]
    Storage(#[source] anyhow::Error),

    #[error("Database failure: {0:#}")]
    Database(#[source] anyhow::Error),

    #[error("Partial delete of {id} at {stage} stage: {source:#}")]
    PartialDelete {
        id: String,
        stage: DeleteStage,
        #[source]
        source: anyhow::Error,
    },
}

impl RegistryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AccessDenied { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BundleParse(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Build { .. }
            | Self::Deploy { .. }
            | Self::Storage(_)
            | Self::Database(_)
            | Self::PartialDelete { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to clients. Collaborator detail stays in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::Build { .. } => "Image build failed".to_string(),
            Self::Deploy { .. } => "Image deployment failed".to_string(),
            Self::Storage(_) => "Bundle storage failed".to_string(),
            Self::Database(_) => "Model catalogue update failed".to_string(),
            Self::PartialDelete { id, stage, .. } => {
                format!("Delete of model {} incomplete at {} stage", id, stage)
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Internal error");
        }

        let body = Json(ErrorResponse {
            error: self.public_message(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Predictor errors
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("Could not find a free port in [{start}, {end})")]
    PortAllocation { start: u16, end: u16 },

    #[error("Failed to start container: {0:#}")]
    ContainerStart(#[source] anyhow::Error),

    #[error("Failed to get container status: {0:#}")]
    ContainerInspect(#[source] anyhow::Error),

    #[error("Container exited unexpectedly ({status})")]
    ContainerCrashed { status: String },

    #[error("Timed out after {0:?} waiting for container to become ready")]
    ReadinessTimeout(Duration),

    #[error("Predictor already {state}")]
    AlreadyStarted { state: String },

    #[error("Predictor is {state}, not running")]
    NotRunning { state: String },

    #[error("{}", bad_request_text(.message))]
    BadRequest { message: Option<String> },

    #[error("/predictions call returned status {status}")]
    Protocol { status: u16 },

    #[error("HTTP request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode prediction response: {0}")]
    Decode(String),

    #[error("Failed to get interface schema: {0}")]
    SchemaFetch(String),

    #[error("Failed to stop container: {0:#}")]
    ContainerStop(#[source] anyhow::Error),

    #[error("Invalid input: {0}")]
    Input(String),
}

fn bad_request_text(message: &Option<String>) -> String {
    match message.as_deref() {
        Some(msg) if !msg.is_empty() => format!("Bad request: {}", msg),
        _ => "Bad request".to_string(),
    }
}
