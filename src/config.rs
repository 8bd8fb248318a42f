//! Configuration structures and loading logic

use crate::webhook::WebHook;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Registry server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub api_port: u16,
    pub data_dir: PathBuf,
    pub max_upload_bytes: u64,

    /// Registry prefix for built images, e.g. `registry.local:5000/models`
    pub image_prefix: String,
    pub docker_binary: String,

    /// Serving platform endpoint. When unset, images are published with `docker push`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_url: Option<String>,

    pub access_control: AccessControlConfig,
    pub webhooks: Vec<WebHook>,
    pub webhook_timeout_secs: u64,
    pub predictor: PredictorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            data_dir: default_data_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            image_prefix: default_image_prefix(),
            docker_binary: default_docker_binary(),
            deploy_url: None,
            access_control: AccessControlConfig::default(),
            webhooks: Vec::new(),
            webhook_timeout_secs: default_webhook_timeout(),
            predictor: PredictorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        if let Ok(port) = std::env::var("MODELBOX_API_PORT") {
            config.api_port = port.parse().context("Invalid MODELBOX_API_PORT value")?;
        }
        if let Ok(data_dir) = std::env::var("MODELBOX_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(prefix) = std::env::var("MODELBOX_IMAGE_PREFIX") {
            config.image_prefix = prefix;
        }
        if let Ok(url) = std::env::var("MODELBOX_DEPLOY_URL") {
            config.deploy_url = Some(url);
        }
        if let Ok(url) = std::env::var("MODELBOX_ACCESS_CONTROL_URL") {
            config.access_control.authority_url = Some(url);
        }
        config.predictor.apply_env()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("max_upload_bytes must be greater than zero");
        }
        if self.image_prefix.is_empty() || self.image_prefix.ends_with('/') {
            anyhow::bail!(
                "image_prefix '{}' must be non-empty without a trailing slash",
                self.image_prefix
            );
        }

        for hook in &self.webhooks {
            if !hook.url.starts_with("http://") && !hook.url.starts_with("https://") {
                anyhow::bail!("Webhook URL '{}' must be http(s)", hook.url);
            }
        }

        for rule in &self.access_control.rules {
            if rule.repo.is_empty() {
                anyhow::bail!("Access rule repo pattern cannot be empty");
            }
        }

        self.predictor.validate()?;

        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Cannot create data directory: {:?}", self.data_dir))?;
        }

        Ok(())
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.join("bundles")
    }

    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join("models.toml")
    }
}

/// Access control configuration
///
/// With `authority_url` set every check is delegated to that service and the
/// static rules are ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AccessControlConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority_url: Option<String>,
    pub rules: Vec<AccessRule>,
}

/// Static grant for a repository pattern (`user/name`, `user/*` or `*`)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AccessRule {
    pub repo: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    /// Bearer token the caller must present. Any caller matches when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Settings for launching and talking to a model container
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PredictorConfig {
    pub startup_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Host port range for auto-allocation [start, end)
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub container_port: u16,
    pub host: String,
    /// Propagated to the container as `MODELBOX_DEBUG=1`
    pub debug: bool,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: default_startup_timeout(),
            poll_interval_ms: default_poll_interval(),
            port_range_start: 5000,
            port_range_end: 6000,
            container_port: 5000,
            host: "localhost".to_string(),
            debug: false,
        }
    }
}

impl PredictorConfig {
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(timeout) = std::env::var("MODELBOX_STARTUP_TIMEOUT") {
            self.startup_timeout_secs = timeout
                .parse()
                .context("Invalid MODELBOX_STARTUP_TIMEOUT value")?;
        }
        if let Ok(debug) = std::env::var("MODELBOX_DEBUG") {
            self.debug = matches!(debug.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.port_range_start >= self.port_range_end {
            anyhow::bail!(
                "Port range [{}, {}) is empty",
                self.port_range_start,
                self.port_range_end
            );
        }
        if self.startup_timeout_secs == 0 {
            anyhow::bail!("startup_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn port_range(&self) -> std::ops::Range<u16> {
        self.port_range_start..self.port_range_end
    }
}

// Default functions
fn default_api_port() -> u16 {
    8080
}
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("modelbox"))
        .unwrap_or_else(|| PathBuf::from("/tmp/modelbox"))
}
fn default_max_upload_bytes() -> u64 {
    5 << 30
}
fn default_image_prefix() -> String {
    "localhost:5000/modelbox".to_string()
}
fn default_docker_binary() -> String {
    "docker".to_string()
}
fn default_webhook_timeout() -> u64 {
    10
}
fn default_startup_timeout() -> u64 {
    300
}
fn default_poll_interval() -> u64 {
    100
}
