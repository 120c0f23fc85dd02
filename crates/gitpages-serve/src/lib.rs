//! Serving pipeline (§4.5): host/path routing, symlink expansion, redirect
//! evaluation, entry serving, and header application, composed from the
//! submodules in this crate. [`ServeContext::serve`] is the single entry
//! point the HTTP edge (`gitpages-server`) calls per request.

mod host;
mod lookup;
mod path;
mod redirect;
mod response;

pub use host::{normalize_host, HostError, HostPolicy};
pub use lookup::LookupOutcome;
pub use path::{parse_write_project, split_project_candidate};
pub use redirect::{match_redirect, RedirectMatch};
pub use response::{decompress, matching_headers, negotiate_encoding, serving_wide_headers, EncodingDecision};

use std::sync::Arc;

use gitpages_blob::BlobStore;
use gitpages_storage::{GetManifestOptions, ManifestStore};
use gitpages_types::{Entry, EntryKind, Error, Manifest, Result, SiteKey, Transform};

const MAX_REDIRECT_RESTARTS: u32 = 8;
const GIT_PAGES_MANIFEST_PATH: &str = ".git-pages/manifest.json";

pub struct ServeContext {
    pub manifests: Arc<dyn ManifestStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub max_symlink_depth: u32,
    pub header_allowlist: Vec<String>,
    pub host_policy: HostPolicy,
}

#[derive(Debug, Clone)]
pub struct ServeRequest {
    pub host: String,
    pub path: String,
    pub query: Option<String>,
    pub accept_encoding: Option<String>,
    pub if_none_match: Option<String>,
    pub has_origin_header: bool,
    /// Whether the caller has already authorized this request for the
    /// `.git-pages/manifest.json` special path — authorization itself is
    /// outside the core pipeline's scope (§4.5).
    pub authorized_for_manifest_json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeResponse {
    Ok { status: u16, headers: Vec<(String, String)>, body: Vec<u8> },
    Redirect { status: u16, location: String },
    NotModified { etag: String },
}

enum RedirectOutcome {
    Respond(ServeResponse),
    Restart(String),
}

impl ServeContext {
    pub async fn serve(&self, request: ServeRequest) -> Result<ServeResponse> {
        let host = normalize_host(&request.host, self.host_policy)
            .map_err(|e| Error::MalformedPatch(e.to_string()))?;

        let relative = request.path.trim_start_matches('/');
        if let Some(special) = self.serve_git_pages_special(&host, relative, &request).await? {
            return Ok(special);
        }

        let (candidate, rest) = split_project_candidate(&request.path);
        let (manifest, site_path) = self.load_manifest_for(&host, candidate, rest).await?;

        self.serve_within_manifest(&manifest, &site_path, &request).await
    }

    async fn serve_git_pages_special(
        &self,
        host: &str,
        relative: &str,
        request: &ServeRequest,
    ) -> Result<Option<ServeResponse>> {
        if !relative.starts_with(".git-pages/") && relative != ".git-pages" {
            return Ok(None);
        }
        if relative != GIT_PAGES_MANIFEST_PATH {
            return Ok(Some(not_found_response()));
        }
        if !request.authorized_for_manifest_json {
            return Ok(Some(ServeResponse::Ok {
                status: 401,
                headers: vec![],
                body: b"authorization required".to_vec(),
            }));
        }

        let key = SiteKey::index(host);
        let (manifest, _meta) = self.manifests.get_manifest(&key, GetManifestOptions::default()).await?;
        let body = gitpages_storage::encode_manifest(&manifest).map_err(Error::Other)?;
        Ok(Some(ServeResponse::Ok {
            status: 200,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body,
        }))
    }

    /// Implements §4.5 steps 2-3: try the candidate project first, fall
    /// back to the domain default.
    async fn load_manifest_for(
        &self,
        host: &str,
        candidate: Option<&str>,
        rest: &str,
    ) -> Result<(Manifest, String)> {
        if let Some(name) = candidate {
            let key = SiteKey::new(host, name);
            match self.manifests.get_manifest(&key, GetManifestOptions::default()).await {
                Ok((manifest, _meta)) => return Ok((manifest, rest.to_string())),
                Err(Error::ObjectNotFound(_)) => {}
                Err(other) => return Err(other),
            }
        }

        let key = SiteKey::index(host);
        let (manifest, _meta) = self.manifests.get_manifest(&key, GetManifestOptions::default()).await?;
        let full_path = match candidate {
            Some(name) if rest.is_empty() => name.to_string(),
            Some(name) => format!("{name}/{rest}"),
            None => rest.to_string(),
        };
        Ok((manifest, full_path))
    }

    async fn serve_within_manifest(
        &self,
        manifest: &Manifest,
        site_path: &str,
        request: &ServeRequest,
    ) -> Result<ServeResponse> {
        let mut path = site_path.to_string();
        let mut restarts = 0u32;

        loop {
            let had_trailing_slash = path.ends_with('/') || path.is_empty();
            let stripped = path.trim_end_matches('/').to_string();

            // A `force` rule takes precedence over a live entry at the same
            // path, so it's checked before the lookup even resolves.
            if let Some(outcome) =
                self.apply_forced_redirect(manifest, &stripped, request, &mut restarts)?
            {
                match outcome {
                    RedirectOutcome::Respond(response) => return Ok(response),
                    RedirectOutcome::Restart(new_path) => {
                        path = new_path;
                        continue;
                    }
                }
            }

            let outcome = lookup::resolve(&manifest.contents, &stripped, self.max_symlink_depth)?;

            let entry = match outcome {
                LookupOutcome::Found { entry, .. } => entry,
                LookupOutcome::NotFound { path: missed } => {
                    if let Some(redirected) = self.apply_redirect(manifest, &missed, request, &mut restarts)? {
                        match redirected {
                            RedirectOutcome::Respond(response) => return Ok(response),
                            RedirectOutcome::Restart(new_path) => {
                                path = new_path;
                                continue;
                            }
                        }
                    }
                    return Ok(self.not_found_with_fallback(manifest));
                }
            };

            if entry.kind.is_directory() {
                if !had_trailing_slash {
                    let query_suffix = request.query.as_deref().map(|q| format!("?{q}")).unwrap_or_default();
                    return Ok(ServeResponse::Redirect {
                        status: 302,
                        location: format!("/{stripped}/{query_suffix}"),
                    });
                }
                let index_path = if stripped.is_empty() {
                    "index.html".to_string()
                } else {
                    format!("{stripped}/index.html")
                };
                return match manifest.contents.get(&index_path) {
                    Some(index_entry) => self.respond_with_entry(manifest, &index_path, index_entry, request).await,
                    None => Ok(self.not_found_with_fallback(manifest)),
                };
            }

            return self.respond_with_entry(manifest, &stripped, &entry, request).await;
        }
    }

    fn apply_forced_redirect(
        &self,
        manifest: &Manifest,
        path: &str,
        request: &ServeRequest,
        restarts: &mut u32,
    ) -> Result<Option<RedirectOutcome>> {
        let request_path = format!("/{path}");
        let Some(hit) = match_redirect(&manifest.redirects, &request_path, request.query.as_deref()) else {
            return Ok(None);
        };
        if !hit.force {
            return Ok(None);
        }
        self.redirect_hit_to_outcome(hit, restarts)
    }

    fn apply_redirect(
        &self,
        manifest: &Manifest,
        missed_path: &str,
        request: &ServeRequest,
        restarts: &mut u32,
    ) -> Result<Option<RedirectOutcome>> {
        let request_path = format!("/{missed_path}");
        let Some(hit) = match_redirect(&manifest.redirects, &request_path, request.query.as_deref()) else {
            return Ok(None);
        };
        self.redirect_hit_to_outcome(hit, restarts)
    }

    fn redirect_hit_to_outcome(&self, hit: RedirectMatch, restarts: &mut u32) -> Result<Option<RedirectOutcome>> {
        if matches!(hit.status, 301 | 302 | 303 | 307 | 308) {
            return Ok(Some(RedirectOutcome::Respond(ServeResponse::Redirect {
                status: hit.status,
                location: hit.to,
            })));
        }

        *restarts += 1;
        if *restarts > MAX_REDIRECT_RESTARTS {
            return Err(Error::MalformedPatch("too many redirect restarts".to_string()));
        }
        let new_path = hit.to.split('?').next().unwrap_or("").trim_start_matches('/').to_string();
        Ok(Some(RedirectOutcome::Restart(new_path)))
    }

    fn not_found_with_fallback(&self, manifest: &Manifest) -> ServeResponse {
        match manifest.contents.get("404.html") {
            Some(entry) if !entry.kind.is_directory() => match inline_bytes(entry) {
                Some(body) => ServeResponse::Ok { status: 404, headers: vec![content_type_header(entry)], body },
                None => not_found_response(),
            },
            _ => not_found_response(),
        }
    }

    async fn respond_with_entry(
        &self,
        manifest: &Manifest,
        path: &str,
        entry: &Entry,
        request: &ServeRequest,
    ) -> Result<ServeResponse> {
        let mut headers = matching_headers(&manifest.headers, path, &self.header_allowlist)?;

        let (status, body) = match &entry.kind {
            EntryKind::InlineFile { data } => self.serve_inline(entry, data, request, &mut headers)?,
            EntryKind::ExternalFile { blob_name } => {
                let etag = response::etag_for_blob(blob_name);
                if response::if_none_match_matches(request.if_none_match.as_deref(), &etag) {
                    return Ok(ServeResponse::NotModified { etag });
                }
                headers.push(("ETag".to_string(), etag));
                let (raw, _meta) = self.blobs.get(blob_name).await?;
                self.serve_inline(entry, &raw, request, &mut headers)?
            }
            EntryKind::Directory | EntryKind::Symlink { .. } => {
                unreachable!("directories and symlinks are resolved before this point")
            }
        };

        headers.push(content_type_header(entry));
        headers.extend(serving_wide_headers(request.has_origin_header));
        Ok(ServeResponse::Ok { status, headers, body })
    }

    fn serve_inline(
        &self,
        entry: &Entry,
        stored: &[u8],
        request: &ServeRequest,
        headers: &mut Vec<(String, String)>,
    ) -> Result<(u16, Vec<u8>)> {
        if entry.transform != Transform::Zstd {
            return Ok((200, stored.to_vec()));
        }
        match negotiate_encoding(request.accept_encoding.as_deref()) {
            EncodingDecision::PassThroughCompressed => {
                headers.push(("Content-Encoding".to_string(), "zstd".to_string()));
                Ok((200, stored.to_vec()))
            }
            EncodingDecision::DecompressServerSide => {
                let decompressed = decompress(stored).map_err(Error::Other)?;
                Ok((200, decompressed))
            }
        }
    }
}

fn not_found_response() -> ServeResponse {
    ServeResponse::Ok {
        status: 404,
        headers: vec![],
        body: b"not found".to_vec(),
    }
}

fn content_type_header(entry: &Entry) -> (String, String) {
    (
        "Content-Type".to_string(),
        entry.content_type.clone().unwrap_or_else(|| "application/octet-stream".to_string()),
    )
}

fn inline_bytes(entry: &Entry) -> Option<Vec<u8>> {
    match &entry.kind {
        EntryKind::InlineFile { data } if entry.transform == Transform::Zstd => decompress(data).ok(),
        EntryKind::InlineFile { data } => Some(data.clone()),
        _ => None,
    }
}
