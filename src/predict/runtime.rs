//! Container runtime abstraction and the `docker` CLI implementation

use super::readiness::ContainerState;
use crate::backends::docker::run_docker_output;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

// ============================================================================
// Trait Definitions
// ============================================================================

/// What to launch and how to wire it up
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Receives container output for as long as the container runs
pub trait LogSink: Send + Sync {
    fn line(&self, stream: LogStream, line: &str);

    /// Called once if following the logs fails
    fn stream_failed(&self, _error: &anyhow::Error) {}
}

/// Forwards container output to tracing
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn line(&self, stream: LogStream, line: &str) {
        match stream {
            LogStream::Stdout => tracing::info!(target: "modelbox::container", "{}", line),
            LogStream::Stderr => tracing::warn!(target: "modelbox::container", "{}", line),
        }
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launch a detached container and return its id
    async fn run_daemon(&self, options: &RunOptions) -> Result<String>;

    async fn inspect(&self, id: &str) -> Result<ContainerState>;

    async fn stop(&self, id: &str) -> Result<()>;

    /// Stream output to `sink` until the container's log stream ends
    async fn follow_logs(&self, id: &str, sink: Arc<dyn LogSink>) -> Result<()>;
}

// ============================================================================
// Production Implementation
// ============================================================================

pub struct DockerCliRuntime {
    binary: String,
}

impl DockerCliRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run_args(options: &RunOptions) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--publish".to_string(),
            format!("{}:{}", options.host_port, options.container_port),
        ];
        for (key, value) in &options.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(options.image.clone());
        args
    }
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn run_daemon(&self, options: &RunOptions) -> Result<String> {
        let id = run_docker_output(&self.binary, &Self::run_args(options)).await?;
        if id.is_empty() {
            anyhow::bail!("docker run returned no container id");
        }
        tracing::debug!(container_id = %id, image = %options.image, "Container started");
        Ok(id)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerState> {
        let args = [
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}} {{.State.ExitCode}}".to_string(),
            id.to_string(),
        ];
        let raw = run_docker_output(&self.binary, &args).await?;
        Ok(ContainerState::parse(&raw))
    }

    async fn stop(&self, id: &str) -> Result<()> {
        run_docker_output(&self.binary, &["stop".to_string(), id.to_string()]).await?;
        Ok(())
    }

    async fn follow_logs(&self, id: &str, sink: Arc<dyn LogSink>) -> Result<()> {
        let mut child = Command::new(&self.binary)
            .args(["logs", "--follow", id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run {} logs", self.binary))?;

        let stdout = child.stdout.take().context("Failed to capture stdout")?;
        let stderr = child.stderr.take().context("Failed to capture stderr")?;

        let (out, err) = tokio::join!(
            forward(stdout, LogStream::Stdout, sink.as_ref()),
            forward(stderr, LogStream::Stderr, sink.as_ref()),
        );
        out?;
        err?;

        let status = child.wait().await.context("Failed to wait for docker logs")?;
        if !status.success() {
            anyhow::bail!("{} logs exited with {}", self.binary, status);
        }
        Ok(())
    }
}

async fn forward<R>(reader: R, stream: LogStream, sink: &dyn LogSink) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .context("Failed to read container output")?;
        if read == 0 {
            return Ok(());
        }
        // Non-UTF-8 output is forwarded lossily
        let line = String::from_utf8_lossy(&buf);
        sink.line(stream, line.trim_end_matches(['\n', '\r']));
    }
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Runtime that replays scripted states and log output
    pub struct MockRuntime {
        pub runs: Mutex<Vec<RunOptions>>,
        pub stops: Mutex<Vec<String>>,
        pub inspections: Mutex<usize>,
        /// Popped on each inspect; the last state repeats
        states: Mutex<VecDeque<ContainerState>>,
        logs: Vec<(LogStream, String)>,
        log_error: Option<String>,
        pub fail_run: AtomicBool,
        pub fail_stop: AtomicBool,
    }

    impl MockRuntime {
        pub fn new(states: Vec<ContainerState>) -> Self {
            Self {
                runs: Mutex::new(Vec::new()),
                stops: Mutex::new(Vec::new()),
                inspections: Mutex::new(0),
                states: Mutex::new(states.into()),
                logs: Vec::new(),
                log_error: None,
                fail_run: AtomicBool::new(false),
                fail_stop: AtomicBool::new(false),
            }
        }

        pub fn with_logs(mut self, logs: &[(LogStream, &str)], error: Option<&str>) -> Self {
            self.logs = logs.iter().map(|(s, l)| (*s, l.to_string())).collect();
            self.log_error = error.map(str::to_string);
            self
        }

        pub fn run_count(&self) -> usize {
            self.runs.lock().unwrap().len()
        }

        pub fn stop_count(&self) -> usize {
            self.stops.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn run_daemon(&self, options: &RunOptions) -> Result<String> {
            if self.fail_run.load(Ordering::SeqCst) {
                anyhow::bail!("image not found");
            }
            let mut runs = self.runs.lock().unwrap();
            runs.push(options.clone());
            Ok(format!("mock-container-{}", runs.len()))
        }

        async fn inspect(&self, _id: &str) -> Result<ContainerState> {
            *self.inspections.lock().unwrap() += 1;
            let mut states = self.states.lock().unwrap();
            let state = if states.len() > 1 {
                states.pop_front()
            } else {
                states.front().cloned()
            };
            state.context("no scripted container state")
        }

        async fn stop(&self, id: &str) -> Result<()> {
            if self.fail_stop.load(Ordering::SeqCst) {
                anyhow::bail!("no such container");
            }
            self.stops.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn follow_logs(&self, _id: &str, sink: Arc<dyn LogSink>) -> Result<()> {
            for (stream, line) in &self.logs {
                sink.line(*stream, line);
            }
            match &self.log_error {
                Some(message) => anyhow::bail!("{}", message),
                None => Ok(()),
            }
        }
    }

    /// Sink that keeps everything it receives
    #[derive(Default)]
    pub struct RecordingSink {
        pub lines: Mutex<Vec<(LogStream, String)>>,
        pub failures: Mutex<Vec<String>>,
    }

    impl LogSink for RecordingSink {
        fn line(&self, stream: LogStream, line: &str) {
            self.lines.lock().unwrap().push((stream, line.to_string()));
        }

        fn stream_failed(&self, error: &anyhow::Error) {
            self.failures.lock().unwrap().push(error.to_string());
        }
    }
}
