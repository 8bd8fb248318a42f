//! Modelbox registry server - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use modelbox::backends::{
    Database, DockerCliBuilder, DockerPushPlatform, FileDatabase, FileSystemStorage,
    HttpServingPlatform, ServingPlatform,
};
use modelbox::orchestrator::{Collaborators, Orchestrator};
use modelbox::webhook::WebHookDispatcher;
use modelbox::{api, auth, config::ServerConfig, metrics};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

/// Timeout for calls to the access authority
const ACCESS_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for the serving platform's deploy call
const DEPLOY_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Parser, Debug)]
#[command(name = "modelbox")]
#[command(about = "Model registry: upload, build, deploy and catalogue model bundles", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override API port
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting modelbox registry");

    // Load configuration
    let mut config = ServerConfig::load(cli.config)?;

    // CLI overrides
    if let Some(port) = cli.port {
        config.api_port = port;
    }

    config.validate()?;

    tracing::info!(
        api_port = config.api_port,
        data_dir = ?config.data_dir,
        image_prefix = %config.image_prefix,
        webhooks = config.webhooks.len(),
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    // Backends
    let database = Arc::new(FileDatabase::open(config.database_file()).await?);
    metrics::update_model_count(database.count().await?);

    let storage = Arc::new(FileSystemStorage::new(config.storage_dir()));
    let builder = Arc::new(DockerCliBuilder::new(config.docker_binary.clone()));
    let platform: Arc<dyn ServingPlatform> = match &config.deploy_url {
        Some(url) => {
            tracing::info!(endpoint = %url, "Deploying through serving platform");
            Arc::new(HttpServingPlatform::new(url.clone(), DEPLOY_TIMEOUT)?)
        }
        None => {
            tracing::info!("Deploying with docker push");
            Arc::new(DockerPushPlatform::new(config.docker_binary.clone()))
        }
    };
    let access = auth::from_config(&config.access_control, ACCESS_TIMEOUT)?;
    tracing::info!(backend = access.name(), "Access control configured");

    let webhooks = WebHookDispatcher::new(
        config.webhooks.clone(),
        Duration::from_secs(config.webhook_timeout_secs),
    )?;

    let orchestrator = Arc::new(Orchestrator::new(
        Collaborators {
            access,
            builder,
            platform,
            storage,
            database,
            webhooks,
        },
        config.image_prefix.clone(),
        config.max_upload_bytes,
    ));

    // Setup API
    let app_state = api::AppState {
        orchestrator,
        prometheus_handle,
    };

    let app = api::create_router(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
