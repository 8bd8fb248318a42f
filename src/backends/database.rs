//! Model catalogue persisted to a TOML file

use super::Database;
use crate::model::Model;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// On-disk catalogue format
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogueFile {
    #[serde(default)]
    models: Vec<Model>,
}

/// Catalogue kept in memory and rewritten to disk on every mutation
pub struct FileDatabase {
    path: PathBuf,
    /// Keyed by (repo, id)
    models: RwLock<BTreeMap<(String, String), Model>>,
}

impl FileDatabase {
    /// Open the catalogue, starting empty if the file doesn't exist
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let models = match fs::read_to_string(&path).await {
            Ok(content) => {
                let file: CatalogueFile = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse catalogue: {:?}", path))?;
                file.models
                    .into_iter()
                    .map(|m| ((m.repo.clone(), m.id.clone()), m))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read catalogue: {:?}", path));
            }
        };

        tracing::info!(path = ?path, models = models.len(), "Model catalogue loaded");

        Ok(Self {
            path,
            models: RwLock::new(models),
        })
    }

    async fn persist(&self, models: &BTreeMap<(String, String), Model>) -> Result<()> {
        let file = CatalogueFile {
            models: models.values().cloned().collect(),
        };
        let content = toml::to_string_pretty(&file).context("Failed to serialize catalogue")?;
        write_atomic(&self.path, &content).await
    }
}

async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.ok();
    }
    let temp_file = path.with_extension("tmp");

    let mut file = fs::File::create(&temp_file)
        .await
        .context("Failed to create temp catalogue file")?;
    file.write_all(content.as_bytes())
        .await
        .context("Failed to write catalogue file")?;
    file.sync_all()
        .await
        .context("Failed to sync catalogue file")?;

    fs::rename(&temp_file, path)
        .await
        .context("Failed to rename temp catalogue file")?;
    Ok(())
}

#[async_trait]
impl Database for FileDatabase {
    async fn insert_model(&self, model: &Model) -> Result<()> {
        let mut models = self.models.write().await;
        let key = (model.repo.clone(), model.id.clone());
        if models.contains_key(&key) {
            tracing::debug!(repo = %model.repo, id = %model.id, "Model already catalogued");
            return Ok(());
        }
        models.insert(key.clone(), model.clone());

        if let Err(e) = self.persist(&models).await {
            models.remove(&key);
            return Err(e);
        }
        Ok(())
    }

    async fn list_models(&self, repo: &str) -> Result<Vec<Model>> {
        let models = self.models.read().await;
        let mut list: Vec<Model> = models
            .values()
            .filter(|m| m.repo == repo)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(list)
    }

    async fn get_model(&self, repo: &str, id: &str) -> Result<Option<Model>> {
        let models = self.models.read().await;
        Ok(models.get(&(repo.to_string(), id.to_string())).cloned())
    }

    async fn delete_model(&self, repo: &str, id: &str) -> Result<bool> {
        let mut models = self.models.write().await;
        let key = (repo.to_string(), id.to_string());
        let Some(removed) = models.remove(&key) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&models).await {
            models.insert(key, removed);
            return Err(e);
        }
        Ok(true)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.models.read().await.len())
    }
}
