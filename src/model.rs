//! Shared data model: catalogue records and the bundle's declarative config

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File name of the model configuration at the root of a bundle
pub const CONFIG_FILE: &str = "cog.yaml";

/// Repository coordinates taken from the request path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub user: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(user: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            name: name.into(),
        }
    }

    /// Storage key for a bundle with the given content hash
    pub fn bundle_path(&self, hash: &str) -> String {
        format!("{}/{}/{}.zip", self.user, self.name, hash)
    }

    /// Deterministic image reference for a bundle with the given content hash
    pub fn image_tag(&self, prefix: &str, hash: &str) -> String {
        format!("{}/{}/{}:{}", prefix, self.user, self.name, hash)
    }
}

impl RepoRef {
    /// Both parts end up in image references and storage paths
    pub fn validate(&self) -> Result<(), String> {
        for (what, part) in [("user", &self.user), ("name", &self.name)] {
            if !is_path_component(part) {
                return Err(format!(
                    "{} '{}' may only contain lowercase letters, digits, '-', '_' and '.'",
                    what, part
                ));
            }
        }
        Ok(())
    }
}

fn is_path_component(part: &str) -> bool {
    !part.is_empty()
        && !part.starts_with('.')
        && part
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "-_.".contains(c))
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user, self.name)
    }
}

/// Catalogue record for an uploaded bundle
///
/// `id` is the content hash, so identical uploads to a repository map onto
/// the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    /// `user/name` of the owning repository
    pub repo: String,
    /// Name declared in the bundle's config
    pub name: String,
    pub created: DateTime<Utc>,
    pub content_hash: String,
    pub storage_path: String,
    pub image: String,
}

/// Declarative configuration shipped inside a bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Predictor reference, e.g. `predict.py:Predictor`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predict: Option<String>,
    #[serde(default)]
    pub build: BuildConfig,
}

/// Build instructions forwarded to the image builder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub gpu: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
    pub python_packages: Vec<String>,
    pub system_packages: Vec<String>,
    /// Dockerfile path relative to the bundle root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
}

impl ModelConfig {
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Reject names that cannot be used as an image path component
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("model name cannot be empty".to_string());
        }
        if !is_path_component(&self.name) {
            return Err(format!(
                "model name '{}' may only contain lowercase letters, digits, '-', '_' and '.'",
                self.name
            ));
        }
        if let Some(dockerfile) = &self.build.dockerfile
            && (dockerfile.starts_with('/') || dockerfile.split('/').any(|part| part == ".."))
        {
            return Err(format!("dockerfile '{}' must stay inside the bundle", dockerfile));
        }
        Ok(())
    }
}
