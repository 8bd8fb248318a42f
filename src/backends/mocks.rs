//! Recording collaborators for pipeline tests

use super::{BuildRequest, Database, ImageBuilder, ServingPlatform, Storage};
use crate::auth::{AccessControl, AccessDecision, AccessError, AccessRequest, Permission};
use crate::model::Model;
use anyhow::Result;
use async_trait::async_trait;
use axum::body::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Builder that records requests and optionally fails
#[derive(Default)]
pub struct MockBuilder {
    pub requests: Mutex<Vec<BuildRequest>>,
    pub fail: AtomicBool,
}

impl MockBuilder {
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageBuilder for MockBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<()> {
        // The source tree must still exist while the build runs
        assert!(request.source_dir.is_dir());
        self.requests.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("build exploded");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPlatform {
    pub deployed: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

impl MockPlatform {
    pub fn calls(&self) -> usize {
        self.deployed.lock().unwrap().len()
    }
}

#[async_trait]
impl ServingPlatform for MockPlatform {
    async fn deploy(&self, tag: &str, hash: &str) -> Result<()> {
        self.deployed
            .lock()
            .unwrap()
            .push((tag.to_string(), hash.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("deploy refused");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockStorage {
    pub objects: Mutex<HashMap<String, Bytes>>,
    pub writes: AtomicUsize,
    pub fail_put: AtomicBool,
    pub fail_delete: AtomicBool,
}

#[async_trait]
impl Storage for MockStorage {
    async fn put(&self, path: &str, bytes: Bytes) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_put.load(Ordering::SeqCst) {
            anyhow::bail!("bucket unavailable");
        }
        self.objects.lock().unwrap().insert(path.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.lock().unwrap().get(path).cloned())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            anyhow::bail!("bucket unavailable");
        }
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDatabase {
    pub models: Mutex<BTreeMap<(String, String), Model>>,
    pub writes: AtomicUsize,
    pub fail_insert: AtomicBool,
    pub fail_delete: AtomicBool,
}

#[async_trait]
impl Database for MockDatabase {
    async fn insert_model(&self, model: &Model) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_insert.load(Ordering::SeqCst) {
            anyhow::bail!("database locked");
        }
        self.models
            .lock()
            .unwrap()
            .entry((model.repo.clone(), model.id.clone()))
            .or_insert_with(|| model.clone());
        Ok(())
    }

    async fn list_models(&self, repo: &str) -> Result<Vec<Model>> {
        Ok(self
            .models
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.repo == repo)
            .cloned()
            .collect())
    }

    async fn get_model(&self, repo: &str, id: &str) -> Result<Option<Model>> {
        Ok(self
            .models
            .lock()
            .unwrap()
            .get(&(repo.to_string(), id.to_string()))
            .cloned())
    }

    async fn delete_model(&self, repo: &str, id: &str) -> Result<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            anyhow::bail!("database locked");
        }
        Ok(self
            .models
            .lock()
            .unwrap()
            .remove(&(repo.to_string(), id.to_string()))
            .is_some())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.models.lock().unwrap().len())
    }
}

/// Access backend with fixed read/write answers
pub struct MockAccess {
    pub read: bool,
    pub write: bool,
    pub checks: Mutex<Vec<Permission>>,
}

impl MockAccess {
    pub fn new(read: bool, write: bool) -> Self {
        Self {
            read,
            write,
            checks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AccessControl for MockAccess {
    async fn check(&self, request: &AccessRequest) -> Result<AccessDecision, AccessError> {
        self.checks.lock().unwrap().push(request.permission);
        let allowed = match request.permission {
            Permission::Read => self.read,
            Permission::Write => self.write,
        };
        Ok(if allowed {
            AccessDecision::Allowed
        } else {
            AccessDecision::Denied
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
