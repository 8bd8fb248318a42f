//! Shared fixtures for the registry integration tests
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use modelbox::api::{AppState, create_router};
use modelbox::auth::RuleAccessControl;
use modelbox::backends::{
    BuildRequest, Database, FileDatabase, FileSystemStorage, ImageBuilder, ServingPlatform,
};
use modelbox::config::AccessRule;
use modelbox::metrics;
use modelbox::orchestrator::{Collaborators, Orchestrator};
use modelbox::webhook::{WebHook, WebHookDispatcher};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tempfile::TempDir;

pub const IMAGE_PREFIX: &str = "registry.test/models";
pub const ALICE_TOKEN: &str = "alice-token";

// Global metrics handle - only initialize once per test process
static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

pub fn metrics_handle() -> metrics_exporter_prometheus::PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| metrics::setup_metrics().expect("Failed to setup metrics"))
        .clone()
}

/// Image builder that records requests instead of shelling out to docker
#[derive(Default)]
pub struct RecordingBuilder {
    pub builds: Mutex<Vec<BuildRequest>>,
    pub fail: AtomicBool,
}

impl RecordingBuilder {
    pub fn calls(&self) -> usize {
        self.builds.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageBuilder for RecordingBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<()> {
        assert!(request.source_dir.join("cog.yaml").is_file());
        self.builds.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("docker build failed in /var/lib/builder/secret");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPlatform {
    pub deployed: Mutex<Vec<String>>,
}

#[async_trait]
impl ServingPlatform for RecordingPlatform {
    async fn deploy(&self, tag: &str, _hash: &str) -> Result<()> {
        self.deployed.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}

pub struct TestRegistry {
    pub server: TestServer,
    pub builder: Arc<RecordingBuilder>,
    pub platform: Arc<RecordingPlatform>,
    pub database: Arc<FileDatabase>,
    pub storage_dir: PathBuf,
    _data_dir: TempDir,
}

impl TestRegistry {
    /// Number of bundle files on disk
    pub fn stored_bundles(&self) -> usize {
        fn walk(dir: &std::path::Path) -> usize {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return 0;
            };
            entries
                .flatten()
                .map(|entry| {
                    let path = entry.path();
                    if path.is_dir() { walk(&path) } else { 1 }
                })
                .sum()
        }
        walk(&self.storage_dir)
    }

    pub async fn catalogued(&self) -> usize {
        self.database.count().await.unwrap()
    }
}

pub struct RegistryOptions {
    pub rules: Vec<AccessRule>,
    pub webhooks: Vec<WebHook>,
    pub max_upload_bytes: u64,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            webhooks: Vec::new(),
            max_upload_bytes: 10 << 20,
        }
    }
}

/// alice may write to her repos with her token; everyone may read them
pub fn default_rules() -> Vec<AccessRule> {
    vec![
        AccessRule {
            repo: "alice/*".to_string(),
            read: true,
            write: true,
            token: Some(ALICE_TOKEN.to_string()),
        },
        AccessRule {
            repo: "alice/*".to_string(),
            read: true,
            write: false,
            token: None,
        },
    ]
}

pub async fn registry() -> TestRegistry {
    registry_with(RegistryOptions::default()).await
}

pub async fn registry_with(options: RegistryOptions) -> TestRegistry {
    let data_dir = TempDir::new().expect("Failed to create temp dir");
    let storage_dir = data_dir.path().join("bundles");

    let builder = Arc::new(RecordingBuilder::default());
    let platform = Arc::new(RecordingPlatform::default());
    let database = Arc::new(
        FileDatabase::open(data_dir.path().join("models.toml"))
            .await
            .expect("Failed to open database"),
    );

    let orchestrator = Orchestrator::new(
        Collaborators {
            access: Arc::new(RuleAccessControl::new(options.rules)),
            builder: builder.clone(),
            platform: platform.clone(),
            storage: Arc::new(FileSystemStorage::new(&storage_dir)),
            database: database.clone(),
            webhooks: WebHookDispatcher::new(options.webhooks, Duration::from_secs(5))
                .expect("Failed to build dispatcher"),
        },
        IMAGE_PREFIX.to_string(),
        options.max_upload_bytes,
    );

    let app = create_router(AppState {
        orchestrator: Arc::new(orchestrator),
        prometheus_handle: metrics_handle(),
    });
    let server = TestServer::try_new(app).expect("Failed to create test server");

    TestRegistry {
        server,
        builder,
        platform,
        database,
        storage_dir,
        _data_dir: data_dir,
    }
}

/// Zip archive with the given files
pub fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, contents) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A valid bundle declaring `name`
pub fn bundle(name: &str) -> Vec<u8> {
    zip_bytes(&[
        ("cog.yaml", &format!("name: {}\npredict: predict.py:Predictor\n", name)),
        ("predict.py", "class Predictor:\n    def predict(self, x):\n        return x\n"),
    ])
}

pub fn bundle_form(bytes: Vec<u8>) -> MultipartForm {
    MultipartForm::new().add_part(
        "file",
        Part::bytes(bytes)
            .file_name("bundle.zip")
            .mime_type("application/zip"),
    )
}
