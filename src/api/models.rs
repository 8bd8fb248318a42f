//! API request and response models

use crate::model::{Model, RepoRef};
use serde::{Deserialize, Serialize};

/// `/v1/repos/{user}/{name}/...`
#[derive(Debug, Deserialize)]
pub struct RepoPath {
    pub user: String,
    pub name: String,
}

impl From<RepoPath> for RepoRef {
    fn from(path: RepoPath) -> Self {
        RepoRef::new(path.user, path.name)
    }
}

/// `/v1/repos/{user}/{name}/models/{id}`
#[derive(Debug, Deserialize)]
pub struct ModelPath {
    pub user: String,
    pub name: String,
    pub id: String,
}

impl ModelPath {
    pub fn into_parts(self) -> (RepoRef, String) {
        (RepoRef::new(self.user, self.name), self.id)
    }
}

/// Returned after a successful upload
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
    pub hash: String,
    /// Deployed image reference
    pub image: String,
}

impl From<&Model> for UploadResponse {
    fn from(model: &Model) -> Self {
        Self {
            id: model.id.clone(),
            hash: model.content_hash.clone(),
            image: model.image.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub id: String,
    pub deleted: bool,
}

/// Result of a `check-read` probe
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessResponse {
    pub repo: String,
    pub permission: String,
}
