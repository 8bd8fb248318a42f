//! Upload → build → deploy → store → catalogue → notify pipeline
//!
//! Every operation takes a grant that only [`Orchestrator::authorize_read`] or
//! [`Orchestrator::authorize_write`] can produce, so no collaborator is reached
//! before the access check has passed.

use crate::auth::{AccessControl, AccessRequest, Permission, authorize};
use crate::backends::{BuildRequest, Database, ImageBuilder, ServingPlatform, Storage};
use crate::bundle::{Bundle, BundleError, ExtractedBundle};
use crate::error::{DeleteStage, RegistryError, RegistryResult};
use crate::model::{Model, RepoRef};
use crate::webhook::{EventKind, RegistryEvent, WebHookDispatcher};
use axum::body::Bytes;
use std::sync::Arc;

/// Proof that the caller may read a repository
#[derive(Debug, Clone)]
pub struct ReadGrant {
    repo: RepoRef,
}

/// Proof that the caller may modify a repository
#[derive(Debug, Clone)]
pub struct WriteGrant {
    repo: RepoRef,
}

impl ReadGrant {
    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }
}

impl WriteGrant {
    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }
}

/// External services the pipeline drives
#[derive(Clone)]
pub struct Collaborators {
    pub access: Arc<dyn AccessControl>,
    pub builder: Arc<dyn ImageBuilder>,
    pub platform: Arc<dyn ServingPlatform>,
    pub storage: Arc<dyn Storage>,
    pub database: Arc<dyn Database>,
    pub webhooks: WebHookDispatcher,
}

pub struct Orchestrator {
    services: Collaborators,
    image_prefix: String,
    max_upload_bytes: u64,
}

impl Orchestrator {
    pub fn new(services: Collaborators, image_prefix: String, max_upload_bytes: u64) -> Self {
        Self {
            services,
            image_prefix,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub async fn authorize_read(
        &self,
        repo: RepoRef,
        token: Option<String>,
    ) -> RegistryResult<ReadGrant> {
        let repo = self.check(repo, Permission::Read, token).await?;
        Ok(ReadGrant { repo })
    }

    pub async fn authorize_write(
        &self,
        repo: RepoRef,
        token: Option<String>,
    ) -> RegistryResult<WriteGrant> {
        let repo = self.check(repo, Permission::Write, token).await?;
        Ok(WriteGrant { repo })
    }

    async fn check(
        &self,
        repo: RepoRef,
        permission: Permission,
        token: Option<String>,
    ) -> RegistryResult<RepoRef> {
        let request = AccessRequest {
            repo,
            permission,
            token,
        };
        if authorize(self.services.access.as_ref(), &request).await {
            Ok(request.repo)
        } else {
            crate::metrics::record_access_denied(permission.as_str());
            Err(RegistryError::AccessDenied {
                repo: request.repo.to_string(),
            })
        }
    }

    /// Run the full upload pipeline for a received bundle.
    ///
    /// Stages are not transactional: a failure after the build leaves the
    /// built image in place.
    pub async fn receive_model(&self, grant: &WriteGrant, bundle: Bundle) -> RegistryResult<Model> {
        let repo = &grant.repo;
        let repo_key = repo.to_string();
        let hash = bundle.hash.clone();

        tracing::info!(repo = %repo, hash = %hash, size = bundle.bytes.len(), "Received bundle");

        let extracted = match extract(bundle.clone()).await {
            Ok(extracted) => extracted,
            Err(e) => {
                crate::metrics::record_upload(&repo_key, "bundle");
                return Err(e);
            }
        };
        let tag = repo.image_tag(&self.image_prefix, &hash);

        let request = BuildRequest {
            source_dir: extracted.source_dir.clone(),
            hash: hash.clone(),
            tag: tag.clone(),
            build: extracted.config.build.clone(),
        };
        if let Err(source) = self.services.builder.build(&request).await {
            crate::metrics::record_upload(&repo_key, "build");
            return Err(RegistryError::Build { tag, source });
        }
        tracing::info!(repo = %repo, tag = %tag, "Image built");

        let model_name = extracted.config.name.clone();
        drop(extracted);

        if let Err(source) = self.services.platform.deploy(&tag, &hash).await {
            crate::metrics::record_upload(&repo_key, "deploy");
            return Err(RegistryError::Deploy { tag, source });
        }
        tracing::info!(repo = %repo, tag = %tag, "Image deployed");

        let storage_path = repo.bundle_path(&hash);
        tracing::info!(path = %storage_path, "Uploading bundle to storage");
        if let Err(e) = self.services.storage.put(&storage_path, bundle.bytes).await {
            crate::metrics::record_upload(&repo_key, "storage");
            return Err(RegistryError::Storage(e));
        }

        let model = Model {
            id: hash.clone(),
            repo: repo_key.clone(),
            name: model_name,
            created: chrono::Utc::now(),
            content_hash: hash.clone(),
            storage_path,
            image: tag,
        };

        tracing::info!(repo = %repo, id = %model.id, "Inserting into database");
        if let Err(e) = self.services.database.insert_model(&model).await {
            crate::metrics::record_upload(&repo_key, "database");
            return Err(RegistryError::Database(e));
        }
        // An identical earlier upload keeps its original record
        let model = self
            .services
            .database
            .get_model(&repo_key, &hash)
            .await
            .map_err(RegistryError::Database)?
            .unwrap_or(model);

        crate::metrics::record_upload(&repo_key, "success");
        self.refresh_model_count().await;

        self.services
            .webhooks
            .dispatch(RegistryEvent::new(EventKind::ModelUploaded, model.clone()));

        Ok(model)
    }

    pub async fn list_models(&self, grant: &ReadGrant) -> RegistryResult<Vec<Model>> {
        self.services
            .database
            .list_models(&grant.repo.to_string())
            .await
            .map_err(RegistryError::Database)
    }

    pub async fn get_model(&self, grant: &ReadGrant, id: &str) -> RegistryResult<Model> {
        self.find(&grant.repo, id).await
    }

    /// Raw bundle bytes for a catalogued model
    pub async fn download(&self, grant: &ReadGrant, id: &str) -> RegistryResult<Bytes> {
        let model = self.find(&grant.repo, id).await?;
        match self.services.storage.get(&model.storage_path).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => {
                tracing::warn!(
                    repo = %grant.repo,
                    id = %id,
                    path = %model.storage_path,
                    "Catalogued model has no stored bundle"
                );
                Err(not_found(&grant.repo, id))
            }
            Err(e) => Err(RegistryError::Storage(e)),
        }
    }

    /// Remove the stored bundle, then the catalogue entry.
    ///
    /// If the bundle cannot be removed the record is left alone.
    pub async fn delete_model(&self, grant: &WriteGrant, id: &str) -> RegistryResult<()> {
        let model = self.find(&grant.repo, id).await?;

        if let Err(source) = self.services.storage.delete(&model.storage_path).await {
            return Err(RegistryError::PartialDelete {
                id: id.to_string(),
                stage: DeleteStage::Storage,
                source,
            });
        }

        match self
            .services
            .database
            .delete_model(&model.repo, &model.id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(repo = %grant.repo, id = %id, "Record already removed");
            }
            Err(source) => {
                return Err(RegistryError::PartialDelete {
                    id: id.to_string(),
                    stage: DeleteStage::Database,
                    source,
                });
            }
        }

        tracing::info!(repo = %grant.repo, id = %id, "Model deleted");
        crate::metrics::record_model_deleted(&model.repo);
        self.refresh_model_count().await;

        self.services
            .webhooks
            .dispatch(RegistryEvent::new(EventKind::ModelDeleted, model));

        Ok(())
    }

    /// Content hashes already uploaded to the repository
    pub async fn cache_hashes(&self, grant: &ReadGrant) -> RegistryResult<Vec<String>> {
        self.services
            .database
            .list_hashes(&grant.repo.to_string())
            .await
            .map_err(RegistryError::Database)
    }

    async fn find(&self, repo: &RepoRef, id: &str) -> RegistryResult<Model> {
        self.services
            .database
            .get_model(&repo.to_string(), id)
            .await
            .map_err(RegistryError::Database)?
            .ok_or_else(|| not_found(repo, id))
    }

    async fn refresh_model_count(&self) {
        if let Ok(count) = self.services.database.count().await {
            crate::metrics::update_model_count(count);
        }
    }
}

fn not_found(repo: &RepoRef, id: &str) -> RegistryError {
    RegistryError::NotFound {
        repo: repo.to_string(),
        id: id.to_string(),
    }
}

async fn extract(bundle: Bundle) -> RegistryResult<ExtractedBundle> {
    tokio::task::spawn_blocking(move || bundle.extract())
        .await
        .map_err(|e| RegistryError::BundleParse(format!("extraction aborted: {}", e)))?
        .map_err(|e| match e {
            BundleError::Io(io) => RegistryError::Storage(anyhow::Error::new(io)),
            other => RegistryError::BundleParse(other.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mocks::{MockAccess, MockBuilder, MockDatabase, MockPlatform, MockStorage};
    use crate::bundle::testing::zip_bytes;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Harness {
        orchestrator: Orchestrator,
        access: Arc<MockAccess>,
        builder: Arc<MockBuilder>,
        platform: Arc<MockPlatform>,
        storage: Arc<MockStorage>,
        database: Arc<MockDatabase>,
    }

    fn harness(read: bool, write: bool) -> Harness {
        let access = Arc::new(MockAccess::new(read, write));
        let builder = Arc::new(MockBuilder::default());
        let platform = Arc::new(MockPlatform::default());
        let storage = Arc::new(MockStorage::default());
        let database = Arc::new(MockDatabase::default());

        let orchestrator = Orchestrator::new(
            Collaborators {
                access: access.clone(),
                builder: builder.clone(),
                platform: platform.clone(),
                storage: storage.clone(),
                database: database.clone(),
                webhooks: WebHookDispatcher::new(vec![], Duration::from_secs(1)).unwrap(),
            },
            "registry.local/models".to_string(),
            1 << 20,
        );

        Harness {
            orchestrator,
            access,
            builder,
            platform,
            storage,
            database,
        }
    }

    fn repo() -> RepoRef {
        RepoRef::new("alice", "resnet")
    }

    fn bundle(name: &str) -> Bundle {
        Bundle::from_bytes(zip_bytes(&[
            ("cog.yaml", &format!("name: {}\nbuild:\n  gpu: true\n", name)),
            ("predict.py", "def predict(x): return x\n"),
        ]))
    }

    #[tokio::test]
    async fn test_upload_runs_every_stage() {
        let h = harness(true, true);
        let grant = h.orchestrator.authorize_write(repo(), None).await.unwrap();
        let bundle = bundle("resnet");
        let hash = bundle.hash.clone();

        let model = h.orchestrator.receive_model(&grant, bundle).await.unwrap();

        assert_eq!(model.id, hash);
        assert_eq!(model.repo, "alice/resnet");
        assert_eq!(model.name, "resnet");
        assert_eq!(model.image, format!("registry.local/models/alice/resnet:{}", hash));
        assert_eq!(model.storage_path, format!("alice/resnet/{}.zip", hash));

        let builds = h.builder.requests.lock().unwrap();
        assert_eq!(builds.len(), 1);
        assert!(builds[0].build.gpu);
        assert_eq!(builds[0].tag, model.image);
        assert_eq!(
            h.platform.deployed.lock().unwrap()[0],
            (model.image.clone(), hash.clone())
        );
        assert!(h.storage.objects.lock().unwrap().contains_key(&model.storage_path));
        assert_eq!(h.database.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_identical_uploads_share_hash_and_tag() {
        let h = harness(true, true);
        let grant = h.orchestrator.authorize_write(repo(), None).await.unwrap();

        let first = h.orchestrator.receive_model(&grant, bundle("resnet")).await.unwrap();
        let second = h.orchestrator.receive_model(&grant, bundle("resnet")).await.unwrap();

        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.image, second.image);
        assert_eq!(first.created, second.created);
        // Both uploads build; deduplication is left to the client
        assert_eq!(h.builder.calls(), 2);
        let read = h.orchestrator.authorize_read(repo(), None).await.unwrap();
        assert_eq!(h.orchestrator.cache_hashes(&read).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_denied_write_touches_nothing() {
        let h = harness(true, false);
        let result = h.orchestrator.authorize_write(repo(), None).await;

        assert!(matches!(result, Err(RegistryError::AccessDenied { .. })));
        assert_eq!(h.builder.calls(), 0);
        assert_eq!(h.platform.calls(), 0);
        assert_eq!(h.storage.writes.load(Ordering::SeqCst), 0);
        assert_eq!(h.database.writes.load(Ordering::SeqCst), 0);
        assert_eq!(*h.access.checks.lock().unwrap(), vec![Permission::Write]);
    }

    #[tokio::test]
    async fn test_build_failure_stops_pipeline() {
        let h = harness(true, true);
        h.builder.fail.store(true, Ordering::SeqCst);
        let grant = h.orchestrator.authorize_write(repo(), None).await.unwrap();

        let err = h
            .orchestrator
            .receive_model(&grant, bundle("resnet"))
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::Build { .. }));
        assert_eq!(h.platform.calls(), 0);
        assert_eq!(h.storage.writes.load(Ordering::SeqCst), 0);
        assert_eq!(h.database.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deploy_failure_leaves_build_in_place() {
        let h = harness(true, true);
        h.platform.fail.store(true, Ordering::SeqCst);
        let grant = h.orchestrator.authorize_write(repo(), None).await.unwrap();

        let err = h
            .orchestrator
            .receive_model(&grant, bundle("resnet"))
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::Deploy { .. }));
        assert_eq!(h.builder.calls(), 1);
        assert_eq!(h.storage.writes.load(Ordering::SeqCst), 0);
        assert_eq!(h.database.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_storage_and_database_failures_are_distinct() {
        let h = harness(true, true);
        let grant = h.orchestrator.authorize_write(repo(), None).await.unwrap();

        h.storage.fail_put.store(true, Ordering::SeqCst);
        let err = h
            .orchestrator
            .receive_model(&grant, bundle("resnet"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Storage(_)));
        assert_eq!(h.database.writes.load(Ordering::SeqCst), 0);

        h.storage.fail_put.store(false, Ordering::SeqCst);
        h.database.fail_insert.store(true, Ordering::SeqCst);
        let err = h
            .orchestrator
            .receive_model(&grant, bundle("resnet"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Database(_)));
    }

    #[tokio::test]
    async fn test_bad_bundle_is_parse_error() {
        let h = harness(true, true);
        let grant = h.orchestrator.authorize_write(repo(), None).await.unwrap();

        let err = h
            .orchestrator
            .receive_model(&grant, Bundle::from_bytes(b"not a zip".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::BundleParse(_)));

        let no_config = Bundle::from_bytes(zip_bytes(&[("predict.py", "")]));
        let err = h.orchestrator.receive_model(&grant, no_config).await.unwrap_err();
        assert!(matches!(err, RegistryError::BundleParse(_)));
        assert_eq!(h.builder.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_adds_no_hash() {
        let h = harness(true, true);
        let grant = h.orchestrator.authorize_write(repo(), None).await.unwrap();
        let ok = h.orchestrator.receive_model(&grant, bundle("first")).await.unwrap();

        h.platform.fail.store(true, Ordering::SeqCst);
        assert!(h.orchestrator.receive_model(&grant, bundle("second")).await.is_err());

        let read = h.orchestrator.authorize_read(repo(), None).await.unwrap();
        assert_eq!(
            h.orchestrator.cache_hashes(&read).await.unwrap(),
            vec![ok.content_hash]
        );
    }

    #[tokio::test]
    async fn test_delete_removes_bundle_then_record() {
        let h = harness(true, true);
        let grant = h.orchestrator.authorize_write(repo(), None).await.unwrap();
        let model = h.orchestrator.receive_model(&grant, bundle("resnet")).await.unwrap();

        h.orchestrator.delete_model(&grant, &model.id).await.unwrap();

        assert!(h.storage.objects.lock().unwrap().is_empty());
        assert_eq!(h.database.count().await.unwrap(), 0);

        let err = h.orchestrator.delete_model(&grant, &model.id).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_storage_delete_failure_keeps_record() {
        let h = harness(true, true);
        let grant = h.orchestrator.authorize_write(repo(), None).await.unwrap();
        let model = h.orchestrator.receive_model(&grant, bundle("resnet")).await.unwrap();

        h.storage.fail_delete.store(true, Ordering::SeqCst);
        let err = h.orchestrator.delete_model(&grant, &model.id).await.unwrap_err();

        assert!(matches!(
            err,
            RegistryError::PartialDelete {
                stage: DeleteStage::Storage,
                ..
            }
        ));
        let read = h.orchestrator.authorize_read(repo(), None).await.unwrap();
        assert!(h.orchestrator.get_model(&read, &model.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_database_delete_failure_is_partial() {
        let h = harness(true, true);
        let grant = h.orchestrator.authorize_write(repo(), None).await.unwrap();
        let model = h.orchestrator.receive_model(&grant, bundle("resnet")).await.unwrap();

        h.database.fail_delete.store(true, Ordering::SeqCst);
        let err = h.orchestrator.delete_model(&grant, &model.id).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::PartialDelete {
                stage: DeleteStage::Database,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_download_returns_bundle() {
        let h = harness(true, true);
        let grant = h.orchestrator.authorize_write(repo(), None).await.unwrap();
        let bundle = bundle("resnet");
        let bytes = bundle.bytes.clone();
        let model = h.orchestrator.receive_model(&grant, bundle).await.unwrap();

        let read = h.orchestrator.authorize_read(repo(), None).await.unwrap();
        assert_eq!(h.orchestrator.download(&read, &model.id).await.unwrap(), bytes);
        assert!(matches!(
            h.orchestrator.download(&read, "missing").await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_models_scoped_to_repo() {
        let h = harness(true, true);
        let alice = h.orchestrator.authorize_write(repo(), None).await.unwrap();
        h.orchestrator.receive_model(&alice, bundle("resnet")).await.unwrap();

        let bob = h
            .orchestrator
            .authorize_read(RepoRef::new("bob", "resnet"), None)
            .await
            .unwrap();
        assert!(h.orchestrator.list_models(&bob).await.unwrap().is_empty());
        assert!(h.orchestrator.cache_hashes(&bob).await.unwrap().is_empty());
    }
}
