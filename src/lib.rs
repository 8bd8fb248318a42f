//! Modelbox - model bundle registry and container predictor
//!
//! The registry accepts zipped model bundles over HTTP, builds and deploys an
//! image for each one, stores the bundle and catalogues it. The predictor runs
//! a built image in a container and calls predictions on it.

pub mod api;
pub mod auth;
pub mod backends;
pub mod bundle;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod predict;
pub mod webhook;

pub use config::{PredictorConfig, ServerConfig};
pub use error::{PredictError, PredictResult, RegistryError, RegistryResult};
pub use model::{Model, ModelConfig, RepoRef};
pub use orchestrator::Orchestrator;
pub use predict::{Inputs, PredictionOutcome, Predictor};
pub use webhook::{WebHook, WebHookDispatcher};
