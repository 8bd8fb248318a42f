//! API request handlers
//!
//! Each repository handler resolves a grant before anything else, so a denied
//! caller never reaches the multipart body or any backend.

use super::models::{AccessResponse, DeleteResponse, ModelPath, RepoPath, UploadResponse};
use super::routes::AppState;
use crate::bundle::{Bundle, BundleAccumulator, BundleError};
use crate::error::{RegistryError, RegistryResult};
use crate::model::{Model, RepoRef};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartError, multipart::MultipartRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Multipart field carrying the bundle
const BUNDLE_FIELD: &str = "file";

/// GET / - Liveness
pub async fn root() -> &'static str {
    "OK"
}

/// GET /ping - Liveness
pub async fn ping() -> &'static str {
    "pong"
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// Token from `Authorization: Bearer <token>`
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn checked(repo: RepoRef) -> RegistryResult<RepoRef> {
    repo.validate().map_err(RegistryError::BadRequest)?;
    Ok(repo)
}

/// PUT /v1/repos/{user}/{name}/models/ - Upload a bundle
pub async fn upload_model(
    State(state): State<AppState>,
    Path(path): Path<RepoPath>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> RegistryResult<Json<UploadResponse>> {
    let repo = checked(path.into())?;
    let grant = state
        .orchestrator
        .authorize_write(repo, bearer_token(&headers))
        .await?;

    let multipart = multipart.map_err(|e| RegistryError::BadRequest(e.body_text()))?;
    let bundle = read_bundle(multipart, state.orchestrator.max_upload_bytes()).await?;
    let model = state.orchestrator.receive_model(&grant, bundle).await?;

    tracing::info!(repo = %grant.repo(), image = %model.image, "Pushed model");
    Ok(Json(UploadResponse::from(&model)))
}

/// Hash and buffer the `file` field in a single pass
async fn read_bundle(mut multipart: Multipart, limit: u64) -> RegistryResult<Bundle> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(BUNDLE_FIELD) {
            continue;
        }

        let mut accumulator = BundleAccumulator::new(limit);
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
            accumulator.push(&chunk).map_err(bundle_error)?;
        }
        return accumulator.finish().map_err(bundle_error);
    }

    Err(RegistryError::BadRequest(format!(
        "missing multipart field '{}'",
        BUNDLE_FIELD
    )))
}

fn multipart_error(e: MultipartError, limit: u64) -> RegistryError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return RegistryError::PayloadTooLarge { limit };
    }
    RegistryError::BadRequest(e.body_text())
}

fn bundle_error(e: BundleError) -> RegistryError {
    match e {
        BundleError::TooLarge { limit } => RegistryError::PayloadTooLarge { limit },
        BundleError::Empty => RegistryError::BadRequest(e.to_string()),
        other => RegistryError::BundleParse(other.to_string()),
    }
}

/// GET /v1/repos/{user}/{name}/models/ - List models
pub async fn list_models(
    State(state): State<AppState>,
    Path(path): Path<RepoPath>,
    headers: HeaderMap,
) -> RegistryResult<Json<Vec<Model>>> {
    let grant = state
        .orchestrator
        .authorize_read(checked(path.into())?, bearer_token(&headers))
        .await?;

    let models = state.orchestrator.list_models(&grant).await?;
    Ok(Json(models))
}

/// GET /v1/repos/{user}/{name}/models/{id} - Model metadata
///
/// An id ending in `.zip` downloads the bundle instead.
pub async fn get_model(
    State(state): State<AppState>,
    Path(path): Path<ModelPath>,
    headers: HeaderMap,
) -> RegistryResult<Response> {
    let (repo, id) = path.into_parts();
    let grant = state
        .orchestrator
        .authorize_read(checked(repo)?, bearer_token(&headers))
        .await?;

    match id.strip_suffix(".zip") {
        Some(id) => {
            let bytes = state.orchestrator.download(&grant, id).await?;
            let disposition =
                HeaderValue::from_str(&format!("attachment; filename=\"{}.zip\"", id))
                    .map_err(|e| RegistryError::BadRequest(e.to_string()))?;
            Ok((
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static("application/zip")),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                Body::from(bytes),
            )
                .into_response())
        }
        None => {
            let model = state.orchestrator.get_model(&grant, &id).await?;
            Ok(Json(model).into_response())
        }
    }
}

/// DELETE /v1/repos/{user}/{name}/models/{id} - Delete model and bundle
pub async fn delete_model(
    State(state): State<AppState>,
    Path(path): Path<ModelPath>,
    headers: HeaderMap,
) -> RegistryResult<Json<DeleteResponse>> {
    let (repo, id) = path.into_parts();
    let grant = state
        .orchestrator
        .authorize_write(checked(repo)?, bearer_token(&headers))
        .await?;

    state.orchestrator.delete_model(&grant, &id).await?;
    Ok(Json(DeleteResponse { id, deleted: true }))
}

/// GET /v1/repos/{user}/{name}/cache-hashes/ - Known content hashes
pub async fn cache_hashes(
    State(state): State<AppState>,
    Path(path): Path<RepoPath>,
    headers: HeaderMap,
) -> RegistryResult<Json<Vec<String>>> {
    let grant = state
        .orchestrator
        .authorize_read(checked(path.into())?, bearer_token(&headers))
        .await?;

    let hashes = state.orchestrator.cache_hashes(&grant).await?;
    Ok(Json(hashes))
}

/// GET /v1/repos/{user}/{name}/check-read - Probe read access
pub async fn check_read(
    State(state): State<AppState>,
    Path(path): Path<RepoPath>,
    headers: HeaderMap,
) -> RegistryResult<Json<AccessResponse>> {
    let grant = state
        .orchestrator
        .authorize_read(checked(path.into())?, bearer_token(&headers))
        .await?;

    Ok(Json(AccessResponse {
        repo: grant.repo().to_string(),
        permission: "read".to_string(),
    }))
}
