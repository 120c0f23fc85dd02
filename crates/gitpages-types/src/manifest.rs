use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Entry, EntryKind, Error, HeaderRule, Problem, RedirectRule};

/// Complete, deterministically-encoded description of a site at a point in
/// time. Owned by a `(domain, project)` key; replaced atomically by CAS;
/// never mutated in place once returned from the cache (callers that need to
/// patch one must clone first).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    /// Path (POSIX-style, relative, no leading `/`, no `.` segments; `""` is
    /// the site root) to the entry at that path.
    pub contents: BTreeMap<String, Entry>,
    pub redirects: Vec<RedirectRule>,
    pub headers: Vec<HeaderRule>,
    pub problems: Vec<Problem>,
    /// Sum of `original_size` across all entries.
    pub original_size_total: u64,
    /// Encoded size of this manifest, used against `max_manifest_size`.
    pub manifest_size_total: u64,
}

impl Manifest {
    pub fn empty() -> Self {
        let mut m = Manifest::default();
        m.contents.insert(String::new(), Entry::directory());
        m
    }

    pub fn root(&self) -> Option<&Entry> {
        self.contents.get("")
    }

    /// Ancestor directory paths of `path`, root first, not including `path`
    /// itself. `"a/b/c"` yields `["", "a", "a/b"]`.
    pub fn ancestors(path: &str) -> Vec<String> {
        if path.is_empty() {
            return Vec::new();
        }
        let mut out = vec![String::new()];
        let segments: Vec<&str> = path.split('/').collect();
        for i in 1..segments.len() {
            out.push(segments[..i].join("/"));
        }
        out
    }

    /// Check the structural invariants every manifest producer must satisfy
    /// before handing a manifest to the CAS layer (§3 invariants 1, 2, 6, 7).
    /// Invariants 3-5 (blob existence, sizes) are checked by the callers that
    /// have the blob store / raw bytes in hand (ingest, CAS commit).
    pub fn validate(&self, header_allowlist: &[String]) -> Result<(), Error> {
        if self.contents.is_empty() {
            return Ok(());
        }

        match self.contents.get("") {
            Some(entry) if entry.kind.is_directory() => {}
            _ => {
                return Err(Error::MalformedPatch(
                    "manifest root \"\" must be a Directory entry".into(),
                ));
            }
        }

        for path in self.contents.keys() {
            for ancestor in Self::ancestors(path) {
                match self.contents.get(&ancestor) {
                    Some(e) if e.kind.is_directory() => {}
                    Some(_) => {
                        return Err(Error::MalformedPatch(format!(
                            "ancestor {ancestor:?} of {path:?} is not a Directory"
                        )));
                    }
                    None => {
                        return Err(Error::MalformedPatch(format!(
                            "ancestor {ancestor:?} of {path:?} does not exist"
                        )));
                    }
                }
            }
        }

        for rule in &self.redirects {
            if !rule.status_is_allowed() {
                return Err(Error::MalformedPatch(format!(
                    "redirect {} -> {} has disallowed status {}",
                    rule.from, rule.to, rule.status
                )));
            }
        }

        for rule in &self.headers {
            if let Err(cause) = rule.validate(header_allowlist) {
                return Err(Error::HeaderNotAllowed(cause));
            }
        }

        Ok(())
    }

    /// Look up the entry referenced by `blob_name`, for GC-style tracing.
    pub fn external_blob_refs(&self) -> impl Iterator<Item = &str> {
        self.contents.values().filter_map(|e| match &e.kind {
            EntryKind::ExternalFile { blob_name } => Some(blob_name.as_str()),
            _ => None,
        })
    }
}
