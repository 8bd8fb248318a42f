//! Access control for repository-scoped requests
//!
//! Decisions come from an external authority behind the [`AccessControl`]
//! trait. Anything other than an explicit allow is a denial.

use crate::config::AccessControlConfig;
use crate::model::RepoRef;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod remote;
pub mod rules;

pub use remote::RemoteAccessControl;
pub use rules::RuleAccessControl;

/// Access control errors
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Access authority unreachable: {0}")]
    Unreachable(String),

    #[error("Unexpected response from access authority: {0}")]
    UnexpectedResponse(String),
}

/// Permission requested on a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied,
}

/// Inputs to an access check
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub repo: RepoRef,
    pub permission: Permission,
    /// Bearer token presented by the caller
    pub token: Option<String>,
}

/// Access decision backend
#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn check(&self, request: &AccessRequest) -> Result<AccessDecision, AccessError>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Run a check, treating authority failures as denial
pub async fn authorize(access: &dyn AccessControl, request: &AccessRequest) -> bool {
    match access.check(request).await {
        Ok(AccessDecision::Allowed) => true,
        Ok(AccessDecision::Denied) => {
            tracing::info!(
                backend = access.name(),
                repo = %request.repo,
                permission = %request.permission,
                "Access denied"
            );
            false
        }
        Err(e) => {
            tracing::warn!(
                backend = access.name(),
                repo = %request.repo,
                permission = %request.permission,
                error = %e,
                "Access check failed, denying"
            );
            false
        }
    }
}

/// Build the configured access backend
pub fn from_config(
    config: &AccessControlConfig,
    timeout: Duration,
) -> anyhow::Result<Arc<dyn AccessControl>> {
    match &config.authority_url {
        Some(url) => Ok(Arc::new(RemoteAccessControl::new(url.clone(), timeout)?)),
        None => Ok(Arc::new(RuleAccessControl::new(config.rules.clone()))),
    }
}
