//! Local filesystem bundle storage

use super::Storage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Stores bundles as files under a root directory
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a storage key, rejecting anything that would leave the root
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("Invalid storage path: {:?}", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Storage for FileSystemStorage {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        // Each writer gets its own temp file so concurrent puts of one key
        // never share it; the rename is atomic.
        let temp_file = temp_path(&path);
        if let Err(e) = write_synced(&temp_file, &bytes).await {
            let _ = fs::remove_file(&temp_file).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_file, &path).await {
            let _ = fs::remove_file(&temp_file).await;
            return Err(e).context("Failed to rename temp bundle file");
        }

        tracing::debug!(path = %key, size = bytes.len(), "Bundle stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(content) => Ok(Some(Bytes::from(content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read bundle: {:?}", path)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete bundle: {:?}", path)),
        }
    }
}

/// Sibling of `path` with a random suffix, hidden from directory listings
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{:016x}.tmp", name, rand::random::<u64>()))
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .context("Failed to create temp bundle file")?;
    file.write_all(bytes)
        .await
        .context("Failed to write bundle file")?;
    file.sync_all().await.context("Failed to sync bundle file")?;
    Ok(())
}
