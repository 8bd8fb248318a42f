//! Image build and publish through the `docker` CLI

use super::{BuildRequest, ImageBuilder, ServingPlatform};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Lines of stderr kept in error messages
const STDERR_TAIL_LINES: usize = 20;

/// Builds images with `docker build`
pub struct DockerCliBuilder {
    binary: String,
}

impl DockerCliBuilder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn build_args(request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--tag".to_string(),
            request.tag.clone(),
            "--label".to_string(),
            format!("org.modelbox.content-hash={}", request.hash),
        ];

        if let Some(dockerfile) = &request.build.dockerfile {
            args.push("--file".to_string());
            args.push(
                request
                    .source_dir
                    .join(dockerfile)
                    .to_string_lossy()
                    .into_owned(),
            );
        }
        if let Some(python) = &request.build.python_version {
            args.push("--build-arg".to_string());
            args.push(format!("PYTHON_VERSION={}", python));
        }
        if !request.build.python_packages.is_empty() {
            args.push("--build-arg".to_string());
            args.push(format!(
                "PYTHON_PACKAGES={}",
                request.build.python_packages.join(" ")
            ));
        }
        if !request.build.system_packages.is_empty() {
            args.push("--build-arg".to_string());
            args.push(format!(
                "SYSTEM_PACKAGES={}",
                request.build.system_packages.join(" ")
            ));
        }
        if request.build.gpu {
            args.push("--build-arg".to_string());
            args.push("GPU=1".to_string());
        }

        args.push(request.source_dir.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl ImageBuilder for DockerCliBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<()> {
        let args = Self::build_args(request);
        tracing::info!(tag = %request.tag, gpu = request.build.gpu, "Building image");
        run_docker(&self.binary, &args).await
    }
}

/// Deploys by pushing the image to its registry, where predictors pull it from
pub struct DockerPushPlatform {
    binary: String,
}

impl DockerPushPlatform {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ServingPlatform for DockerPushPlatform {
    async fn deploy(&self, tag: &str, hash: &str) -> Result<()> {
        tracing::info!(tag = %tag, hash = %hash, "Pushing image");
        run_docker(&self.binary, &["push".to_string(), tag.to_string()]).await
    }
}

/// Run a docker command to completion, failing with its stderr tail
pub(crate) async fn run_docker(binary: &str, args: &[String]) -> Result<()> {
    run_docker_output(binary, args).await.map(|_| ())
}

/// Run a docker subcommand and return its trimmed stdout
pub(crate) async fn run_docker_output(binary: &str, args: &[String]) -> Result<String> {
    let subcommand = args.first().map(String::as_str).unwrap_or_default();
    let output = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to run {} {}", binary, subcommand))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "{} {} exited with {}: {}",
            binary,
            subcommand,
            output.status,
            stderr_tail(&stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
