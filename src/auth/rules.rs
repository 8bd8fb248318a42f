//! Static rule-based access control

use super::{AccessControl, AccessDecision, AccessError, AccessRequest, Permission};
use crate::config::AccessRule;
use crate::model::RepoRef;
use async_trait::async_trait;

/// Grants access from a fixed list of rules; no match means denied
pub struct RuleAccessControl {
    rules: Vec<AccessRule>,
}

impl RuleAccessControl {
    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self { rules }
    }

    fn grants(rule: &AccessRule, request: &AccessRequest) -> bool {
        if !repo_matches(&rule.repo, &request.repo) {
            return false;
        }
        if let Some(expected) = &rule.token
            && request.token.as_deref() != Some(expected.as_str())
        {
            return false;
        }
        match request.permission {
            Permission::Read => rule.read || rule.write,
            Permission::Write => rule.write,
        }
    }
}

fn repo_matches(pattern: &str, repo: &RepoRef) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.split_once('/') {
        Some((user, "*")) => user == repo.user,
        Some((user, name)) => user == repo.user && name == repo.name,
        None => false,
    }
}

#[async_trait]
impl AccessControl for RuleAccessControl {
    async fn check(&self, request: &AccessRequest) -> Result<AccessDecision, AccessError> {
        if self.rules.iter().any(|rule| Self::grants(rule, request)) {
            Ok(AccessDecision::Allowed)
        } else {
            Ok(AccessDecision::Denied)
        }
    }

    fn name(&self) -> &str {
        "rules"
    }
}
