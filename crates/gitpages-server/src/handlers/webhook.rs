//! Push-event webhook handler (§4.2 "Git import", §6): Forgejo/Gitea/GitHub/
//! Gogs push a JSON body to the project's write URL; a matching push to the
//! configured branch triggers a fetch-and-replace, mirroring what a PUT with
//! a repo URL does but driven by the remote instead of the caller.
//!
//! GitHub multiplexes many event types onto the same endpoint, distinguished
//! only by `X-GitHub-Event` — that header is checked here, before the body
//! ever reaches [`gitpages_ingest::parse_push_event`], since the parser
//! itself has no provider-specific header to look at.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

use gitpages_git::{CliGitTreeSource, GitTreeSource};
use gitpages_ingest::{parse_push_event, IngestInputs};
use gitpages_storage::{CommitPreconditions, GetManifestOptions};
use gitpages_types::{AuditEventKind, Error};

use crate::error::ApiError;
use crate::handlers::write::outcome_response;
use crate::state::AppState;

pub async fn receive(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(event) = headers.get("x-github-event").and_then(|v| v.to_str().ok()) {
        if event != "push" {
            return Err(ApiError::bad_request(format!("ignoring non-push GitHub event: {event}")));
        }
    }

    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing Host header"))?;
    let domain = gitpages_serve::normalize_host(host, gitpages_serve::HostPolicy::default())?;
    let project = gitpages_serve::parse_write_project(uri.path())?;
    let key = gitpages_types::SiteKey::new(domain, project);

    let (existed, expected_branch) = match state.manifests.get_manifest(&key, GetManifestOptions { bypass_cache: true }).await {
        Ok((manifest, _)) => (true, manifest.branch.clone().unwrap_or_else(|| "main".to_string())),
        Err(Error::ObjectNotFound(_)) => (false, "main".to_string()),
        Err(other) => return Err(other.into()),
    };

    let event = parse_push_event(&body, &expected_branch)?;

    let source = CliGitTreeSource::new(std::env::temp_dir().join("git-pages-checkouts"));
    let tree = source
        .list_tree(&event.repo_url, &expected_branch)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let hashes: Vec<String> = tree.entries.iter().map(|(_, hash)| hash.clone()).collect();
    let (blobs, _stats) = source
        .fetch_blobs(&event.repo_url, &expected_branch, &hashes)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let commit = tree.commit.clone();
    let mut files: BTreeMap<String, (Vec<u8>, String)> = BTreeMap::new();
    for (path, hash) in tree.entries {
        let data = blobs.get(&hash).cloned().unwrap_or_default();
        files.insert(path, (data, hash));
    }

    let inputs = IngestInputs {
        header_allowlist: &state.config.limits.allowed_custom_headers,
        repo_url: Some(event.repo_url.clone()),
        branch: Some(expected_branch),
        commit: Some(commit.clone()),
    };
    let mut manifest = gitpages_ingest::prepare_from_git_tree(files, inputs)?;

    let limits = gitpages_ingest::ExternalizeLimits {
        max_inline_file_size: state.config.limits.max_inline_file_size,
        max_site_size: state.config.limits.max_site_size,
        max_manifest_size: state.config.limits.max_manifest_size,
    };
    gitpages_ingest::externalize(state.blobs.clone(), &mut manifest, &limits).await?;
    state.cas.write_full(&key, &manifest, CommitPreconditions::default()).await?;

    state
        .audit
        .record(AuditEventKind::ManifestCommitted, key.domain.clone(), key.project.clone(), Some(manifest), None)
        .await?;

    let outcome = if existed { "replaced" } else { "created" };
    Ok(outcome_response(StatusCode::OK, outcome, &commit))
}
