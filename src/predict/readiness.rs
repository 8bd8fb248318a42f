//! Startup readiness decision
//!
//! The polling loop in the predictor gathers observations; this module turns
//! them into a decision without touching timers or the network.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Container lifecycle state as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited { code: Option<i64> },
    Dead,
    Unknown(String),
}

impl ContainerState {
    /// Parse `docker inspect` output of the form `<status> [<exit code>]`
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split_whitespace();
        let status = parts.next().unwrap_or_default();
        match status {
            "created" => Self::Created,
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "paused" => Self::Paused,
            "exited" => Self::Exited {
                code: parts.next().and_then(|c| c.parse().ok()),
            },
            "dead" => Self::Dead,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The container is gone and will not come back on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Dead)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Restarting => write!(f, "restarting"),
            Self::Paused => write!(f, "paused"),
            Self::Exited { code: Some(code) } => write!(f, "exited with code {}", code),
            Self::Exited { code: None } => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Unknown(status) => write!(f, "{}", status),
        }
    }
}

/// Result of one liveness probe against the container root path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Status(u16),
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupFailure {
    Timeout(Duration),
    Crashed(ContainerState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Continue,
    Ready,
    Failed(StartupFailure),
}

/// Decide what the readiness loop does next.
///
/// The deadline wins over everything else, then a terminal container state,
/// then the probe. `probe` is `None` when no probe was sent this round.
pub fn evaluate(
    elapsed: Duration,
    timeout: Duration,
    state: &ContainerState,
    probe: Option<Probe>,
) -> Readiness {
    if elapsed > timeout {
        return Readiness::Failed(StartupFailure::Timeout(timeout));
    }
    if state.is_terminal() {
        return Readiness::Failed(StartupFailure::Crashed(state.clone()));
    }
    match probe {
        Some(Probe::Status(200)) => Readiness::Ready,
        _ => Readiness::Continue,
    }
}
