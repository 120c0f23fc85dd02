//! PUT/PATCH/DELETE content-plane handlers (§4.2, §4.3, §6).
//!
//! PUT always produces a brand-new manifest (archive upload, or a
//! form-encoded repo URL that triggers a git import) and replaces whatever
//! was there unconditionally. PATCH diffs a tar against the *current*
//! manifest under the per-key CAS lock; because externalizing large files
//! to blob storage needs async I/O that [`gitpages_cas::CasStore::patch`]'s
//! synchronous closure can't perform, the externalized candidate is built
//! from a provisional read taken before the lock and only committed if the
//! lock's own fresh read still matches it — otherwise the request loses the
//! race and surfaces as the `WriteConflict` PATCH callers are expected to
//! retry on (§4.3).

use std::collections::BTreeMap;
use std::io::Cursor;

use axum::body::{Body, Bytes};
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use gitpages_git::GitTreeSource;
use gitpages_ingest::{ArchiveKind, ExternalizeLimits, IngestInputs};
use gitpages_storage::{CommitPreconditions, GetManifestOptions};
use gitpages_types::{AuditEventKind, Error, Manifest, SiteKey};

use crate::error::ApiError;
use crate::state::AppState;

fn site_key(headers: &HeaderMap, path: &str) -> Result<SiteKey, ApiError> {
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing Host header"))?;
    let domain = gitpages_serve::normalize_host(host, gitpages_serve::HostPolicy::default())?;
    let project = gitpages_serve::parse_write_project(path)?;
    Ok(SiteKey::new(domain, project))
}

fn limits_from(config: &gitpages_config::Config) -> ExternalizeLimits {
    ExternalizeLimits {
        max_inline_file_size: config.limits.max_inline_file_size,
        max_site_size: config.limits.max_site_size,
        max_manifest_size: config.limits.max_manifest_size,
    }
}

#[derive(Deserialize)]
struct RepoUrlForm {
    url: String,
    #[serde(default = "default_branch")]
    branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

pub(crate) fn outcome_response(status: StatusCode, outcome: &str, detail: &str) -> Response {
    Response::builder()
        .status(status)
        .header("X-Pages-Update", outcome)
        .body(Body::from(detail.to_string()))
        .expect("fixed header/status/body always builds")
}

pub async fn put(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let key = site_key(&headers, uri.path())?;
    let existed = manifest_exists(&state, &key).await?;

    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let base_inputs = IngestInputs {
        header_allowlist: &state.config.limits.allowed_custom_headers,
        repo_url: None,
        branch: None,
        commit: None,
    };

    let mut manifest = if content_type.starts_with("application/x-www-form-urlencoded") {
        build_manifest_from_git_url(&state, &body, base_inputs).await?
    } else {
        build_manifest_from_archive(&content_type, &body, state.config.limits.max_site_size, base_inputs)?
    };

    gitpages_ingest::externalize(state.blobs.clone(), &mut manifest, &limits_from(&state.config)).await?;
    state.cas.write_full(&key, &manifest, CommitPreconditions::default()).await?;
    record_commit(&state, &key, manifest).await?;

    let outcome = if existed { "replaced" } else { "created" };
    Ok(outcome_response(StatusCode::OK, outcome, ""))
}

pub async fn patch(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let key = site_key(&headers, uri.path())?;
    let limits = limits_from(&state.config);

    let (provisional_current, _meta) = state
        .manifests
        .get_manifest(&key, GetManifestOptions { bypass_cache: true })
        .await?;

    let inputs = IngestInputs {
        header_allowlist: &state.config.limits.allowed_custom_headers,
        repo_url: provisional_current.repo_url.clone(),
        branch: provisional_current.branch.clone(),
        commit: provisional_current.commit.clone(),
    };
    let mut candidate = gitpages_ingest::apply_patch(&provisional_current, Cursor::new(body.as_ref()), true, inputs)?;
    gitpages_ingest::externalize(state.blobs.clone(), &mut candidate, &limits).await?;

    let base = provisional_current.clone();
    let key_for_closure = key.clone();
    let patch_result = state
        .cas
        .patch(&key, move |current: Manifest| -> gitpages_types::Result<Manifest> {
            if current != base {
                return Err(Error::WriteConflict(format!(
                    "{}/{} changed concurrently with this patch",
                    key_for_closure.domain, key_for_closure.project
                )));
            }
            Ok(candidate)
        })
        .await?;
    let _ = patch_result;

    let (committed, _) = state.manifests.get_manifest(&key, GetManifestOptions { bypass_cache: true }).await?;
    record_commit(&state, &key, committed).await?;
    Ok(outcome_response(StatusCode::OK, "replaced", ""))
}

pub async fn delete(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let key = site_key(&headers, uri.path())?;
    state.cas.delete(&key, CommitPreconditions::default()).await?;
    state
        .audit
        .record(AuditEventKind::ManifestDeleted, key.domain.clone(), key.project.clone(), None, None)
        .await?;
    Ok(outcome_response(StatusCode::OK, "deleted", ""))
}

async fn manifest_exists(state: &AppState, key: &SiteKey) -> Result<bool, ApiError> {
    match state.manifests.get_manifest(key, GetManifestOptions { bypass_cache: true }).await {
        Ok(_) => Ok(true),
        Err(Error::ObjectNotFound(_)) => Ok(false),
        Err(other) => Err(other.into()),
    }
}

async fn record_commit(state: &AppState, key: &SiteKey, manifest: Manifest) -> Result<(), ApiError> {
    state
        .audit
        .record(AuditEventKind::ManifestCommitted, key.domain.clone(), key.project.clone(), Some(manifest), None)
        .await?;
    Ok(())
}

fn build_manifest_from_archive(
    content_type: &str,
    body: &[u8],
    max_site_size: u64,
    inputs: IngestInputs<'_>,
) -> Result<Manifest, ApiError> {
    let kind = match content_type {
        "application/x-tar" => ArchiveKind::Tar,
        "application/x-tar+gzip" | "application/gzip" | "application/x-gzip" => ArchiveKind::TarGzip,
        "application/x-tar+zstd" | "application/zstd" => ArchiveKind::TarZstd,
        "application/zip" => {
            let manifest = gitpages_ingest::prepare_from_zip(Cursor::new(body), max_site_size, inputs)?;
            return Ok(manifest);
        }
        other => return Err(ApiError::unsupported_media_type(format!("unsupported archive content-type: {other}"))),
    };
    let manifest = gitpages_ingest::prepare_from_tar_stream(kind, Cursor::new(body.to_vec()), max_site_size, inputs)?;
    Ok(manifest)
}

async fn build_manifest_from_git_url(
    state: &AppState,
    body: &[u8],
    inputs: IngestInputs<'_>,
) -> Result<Manifest, ApiError> {
    let form: RepoUrlForm =
        serde_urlencoded::from_bytes(body).map_err(|e| ApiError::bad_request(format!("malformed form body: {e}")))?;

    let source = gitpages_git::CliGitTreeSource::new(std::env::temp_dir().join("git-pages-checkouts"));
    let tree = source
        .list_tree(&form.url, &form.branch)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let hashes: Vec<String> = tree.entries.iter().map(|(_, hash)| hash.clone()).collect();
    let (blobs, _stats) = source
        .fetch_blobs(&form.url, &form.branch, &hashes)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let mut files: BTreeMap<String, (Vec<u8>, String)> = BTreeMap::new();
    for (path, hash) in tree.entries {
        let data = blobs.get(&hash).cloned().unwrap_or_default();
        files.insert(path, (data, hash));
    }

    let inputs = IngestInputs {
        repo_url: Some(form.url.clone()),
        branch: Some(form.branch.clone()),
        commit: Some(tree.commit.clone()),
        ..inputs
    };
    let manifest = gitpages_ingest::prepare_from_git_tree(files, inputs)?;
    Ok(manifest)
}
