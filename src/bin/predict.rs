//! Run a model image locally and make a single prediction against it
//!
//! Usage:
//!   modelbox-predict registry.local/alice/resnet:abc123 -i image=@cat.png -i top_k=3

use anyhow::{Context, Result};
use clap::Parser;
use modelbox::config::ServerConfig;
use modelbox::predict::{DockerCliRuntime, Inputs, PredictionOutcome, Predictor, TracingLogSink};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "modelbox-predict")]
#[command(about = "Start a model container, run one prediction, stop it")]
#[command(version)]
struct Cli {
    /// Image reference to run
    image: String,

    /// Prediction input as key=value, or key=@path to send a file
    #[arg(short, long = "input")]
    inputs: Vec<String>,

    /// Path to configuration file (uses its [predictor] section)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the declared inputs instead of predicting
    #[arg(long)]
    schema: bool,

    /// Pass the debug flag into the container
    #[arg(long)]
    debug: bool,

    /// Override startup timeout in seconds
    #[arg(long)]
    startup_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    let server_config = ServerConfig::load(cli.config.clone())?;
    let mut config = server_config.predictor;
    if cli.debug {
        config.debug = true;
    }
    if let Some(secs) = cli.startup_timeout {
        config.startup_timeout_secs = secs;
    }
    config.validate()?;

    let inputs = Inputs::parse(&cli.inputs)?;

    let runtime = Arc::new(DockerCliRuntime::new(server_config.docker_binary));
    let mut predictor = Predictor::new(cli.image.clone(), config, runtime)?;

    tracing::info!(image = %cli.image, "Starting container");
    if let Err(e) = predictor.start(Arc::new(TracingLogSink)).await {
        stop(&mut predictor).await;
        return Err(e).context("Model container did not start");
    }
    tracing::info!(port = ?predictor.port(), "Model is ready");

    let result = if cli.schema {
        print_schema(&predictor).await
    } else {
        run_prediction(&predictor, &inputs).await
    };

    stop(&mut predictor).await;
    result
}

async fn print_schema(predictor: &Predictor) -> Result<()> {
    let schema = predictor.schema().await?;
    for name in schema.input_names() {
        println!("{}", name);
    }
    Ok(())
}

async fn run_prediction(predictor: &Predictor, inputs: &Inputs) -> Result<()> {
    match predictor.predict(inputs).await? {
        PredictionOutcome::Success { output } => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        PredictionOutcome::Failure { message } => anyhow::bail!("Prediction failed: {}", message),
        PredictionOutcome::Pending { status } => {
            anyhow::bail!("Prediction did not complete (status {:?})", status)
        }
        PredictionOutcome::BadRequest { message } => {
            anyhow::bail!("Bad request: {}", message.unwrap_or_default())
        }
    }
}

async fn stop(predictor: &mut Predictor) {
    if let Err(e) = predictor.stop().await {
        tracing::warn!(error = %e, "Failed to stop container");
    }
}
