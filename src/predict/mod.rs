//! Running a built model image and calling predictions on it

pub mod port;
pub mod predictor;
pub mod readiness;
pub mod runtime;
pub mod schema;
pub mod types;

pub use port::find_free_port_in_range;
pub use predictor::{DEBUG_ENV, Predictor, PredictorState};
pub use readiness::{ContainerState, Probe, Readiness, StartupFailure, evaluate};
pub use runtime::{
    ContainerRuntime, DockerCliRuntime, LogSink, LogStream, RunOptions, TracingLogSink,
};
pub use schema::InterfaceSchema;
pub use types::{InputValue, Inputs, PredictionOutcome, PredictionRequest, Status};
