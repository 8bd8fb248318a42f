//! Collaborators of the upload pipeline
//!
//! Each concern sits behind a trait so the orchestrator can be driven by the
//! production adapters here or by recording mocks in tests.

use crate::model::{BuildConfig, Model};
use anyhow::Result;
use async_trait::async_trait;
use axum::body::Bytes;
use std::path::PathBuf;

pub mod database;
pub mod docker;
pub mod serving;
pub mod storage;

#[cfg(test)]
pub mod mocks;

pub use database::FileDatabase;
pub use docker::{DockerCliBuilder, DockerPushPlatform};
pub use serving::HttpServingPlatform;
pub use storage::FileSystemStorage;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Everything the builder needs to produce an image
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source_dir: PathBuf,
    pub hash: String,
    pub tag: String,
    pub build: BuildConfig,
}

/// Turns an extracted source tree into a container image
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> Result<()>;
}

/// Makes a built image available to run
#[async_trait]
pub trait ServingPlatform: Send + Sync {
    async fn deploy(&self, tag: &str, hash: &str) -> Result<()>;
}

/// Blob storage for raw bundles
#[async_trait]
pub trait Storage: Send + Sync {
    async fn put(&self, path: &str, bytes: Bytes) -> Result<()>;

    /// Returns None if nothing is stored at `path`
    async fn get(&self, path: &str) -> Result<Option<Bytes>>;

    /// Deleting a missing object is not an error
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Model catalogue
#[async_trait]
pub trait Database: Send + Sync {
    /// Insert a record. Re-inserting an existing id keeps the stored record.
    async fn insert_model(&self, model: &Model) -> Result<()>;

    async fn list_models(&self, repo: &str) -> Result<Vec<Model>>;

    async fn get_model(&self, repo: &str, id: &str) -> Result<Option<Model>>;

    /// Returns false if there was no such record
    async fn delete_model(&self, repo: &str, id: &str) -> Result<bool>;

    /// Content hashes known for a repository, sorted and unique
    async fn list_hashes(&self, repo: &str) -> Result<Vec<String>> {
        let mut hashes: Vec<String> = self
            .list_models(repo)
            .await?
            .into_iter()
            .map(|m| m.content_hash)
            .collect();
        hashes.sort();
        hashes.dedup();
        Ok(hashes)
    }

    async fn count(&self) -> Result<usize>;
}
