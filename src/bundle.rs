//! Model bundle handling
//!
//! A bundle is a zip archive holding model source and a `cog.yaml` at its
//! root. Uploads are hashed while they are received so the bytes are read off
//! the network exactly once, then extracted into an isolated temp directory.

use crate::model::{CONFIG_FILE, ModelConfig};
use axum::body::Bytes;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;

/// Name of the directory the archive is unpacked into
const SOURCE_DIR: &str = "src";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle exceeds maximum size of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("bundle is empty")]
    Empty,

    #[error("failed to read zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("bundle has no cog.yaml at its root")]
    MissingConfig,

    #[error("failed to parse cog.yaml: {0}")]
    Config(String),

    #[error("failed to prepare extraction directory: {0}")]
    Io(#[from] std::io::Error),
}

/// SHA-256 hex digest of a bundle's bytes
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Collects an upload chunk by chunk, hashing as it goes
pub struct BundleAccumulator {
    hasher: Sha256,
    buffer: Vec<u8>,
    limit: u64,
}

impl BundleAccumulator {
    pub fn new(limit: u64) -> Self {
        Self {
            hasher: Sha256::new(),
            buffer: Vec::new(),
            limit,
        }
    }

    /// Append a chunk, failing once the running total passes the limit
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), BundleError> {
        if (self.buffer.len() + chunk.len()) as u64 > self.limit {
            return Err(BundleError::TooLarge { limit: self.limit });
        }
        self.hasher.update(chunk);
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn finish(self) -> Result<Bundle, BundleError> {
        if self.buffer.is_empty() {
            return Err(BundleError::Empty);
        }
        Ok(Bundle {
            hash: hex::encode(self.hasher.finalize()),
            bytes: Bytes::from(self.buffer),
        })
    }
}

/// A fully received bundle and its content hash
#[derive(Debug, Clone)]
pub struct Bundle {
    pub hash: String,
    pub bytes: Bytes,
}

impl Bundle {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            hash: content_hash(&bytes),
            bytes,
        }
    }

    /// Unpack into a fresh temp directory and parse the embedded config.
    ///
    /// Blocking; call from `spawn_blocking`.
    pub fn extract(&self) -> Result<ExtractedBundle, BundleError> {
        let temp = tempfile::Builder::new().prefix("modelbox-unzip").tempdir()?;
        let source_dir = temp.path().join(SOURCE_DIR);
        std::fs::create_dir(&source_dir)?;

        let mut archive = zip::ZipArchive::new(Cursor::new(self.bytes.as_ref()))?;
        archive.extract(&source_dir)?;

        let config = read_config(&source_dir)?;

        tracing::debug!(
            hash = %self.hash,
            files = archive.len(),
            model = %config.name,
            "Bundle extracted"
        );

        Ok(ExtractedBundle {
            _temp: temp,
            source_dir,
            config,
        })
    }
}

/// Extracted source tree; removed from disk when dropped
pub struct ExtractedBundle {
    _temp: TempDir,
    pub source_dir: PathBuf,
    pub config: ModelConfig,
}

fn read_config(source_dir: &Path) -> Result<ModelConfig, BundleError> {
    let path = source_dir.join(CONFIG_FILE);
    if !path.is_file() {
        return Err(BundleError::MissingConfig);
    }
    let raw = std::fs::read_to_string(&path)?;
    let config = ModelConfig::from_yaml(&raw).map_err(|e| BundleError::Config(e.to_string()))?;
    config.validate().map_err(BundleError::Config)?;
    Ok(config)
}
