//! Core data model and error kinds for git-pages.
//!
//! This crate has no I/O of its own: it defines the [`Manifest`] and its
//! embedded entities (§3 of the design), the [`SiteKey`] a manifest is keyed
//! by, [`AuditRecord`]/[`SnowflakeId`], and the unified [`Error`] enum that
//! every other crate in the workspace converts its local errors into.
//!
//! Validation lives here too: [`Manifest::validate`] checks the structural
//! invariants (root directory entry, ancestor directories, redirect/header
//! allowlists) that every producer of a manifest — ingest, patch, git import
//! — must uphold before handing it to the CAS layer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use gitpages_duration::{deserialize_duration, serialize_duration};

mod error;
mod manifest;
mod snowflake;

pub use error::Error;
pub use manifest::Manifest;
pub use snowflake::{SnowflakeGenerator, SnowflakeId};

pub type Result<T> = std::result::Result<T, Error>;

/// The `(domain, project)` pair a manifest is stored and looked up under.
///
/// `.index` is the synthetic project name for a domain's default site; it is
/// never a valid project name a tenant can name explicitly (the server
/// rejects a leading-`.` path segment before this type is ever constructed
/// from one).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteKey {
    pub domain: String,
    pub project: String,
}

/// Synthetic project name for a domain's default site.
pub const INDEX_PROJECT: &str = ".index";

impl SiteKey {
    pub fn new(domain: impl Into<String>, project: impl Into<String>) -> Self {
        SiteKey {
            domain: domain.into(),
            project: project.into(),
        }
    }

    /// Key for the domain-default site.
    pub fn index(domain: impl Into<String>) -> Self {
        SiteKey {
            domain: domain.into(),
            project: INDEX_PROJECT.to_string(),
        }
    }

    pub fn is_index(&self) -> bool {
        self.project == INDEX_PROJECT
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.project)
    }
}

/// How an entry's stored bytes relate to its logical content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    /// Stored bytes are the content bytes, unmodified.
    Identity,
    /// Stored bytes are Zstd-compressed content bytes.
    Zstd,
}

/// The payload of a manifest [`Entry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Directory,
    /// Content bytes stored directly in the manifest.
    InlineFile { data: Vec<u8> },
    /// Content bytes stored in the blob store under this name.
    ExternalFile { blob_name: String },
    /// Target path of the symlink, relative to its containing directory.
    Symlink { target: String },
}

impl EntryKind {
    pub fn is_directory(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, EntryKind::Symlink { .. })
    }
}

/// A single path's worth of metadata and payload within a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub kind: EntryKind,
    pub transform: Transform,
    pub original_size: u64,
    pub compressed_size: u64,
    pub content_type: Option<String>,
    /// Git blob hash this entry was imported from, if any (used to dedupe
    /// blob uploads across repository fetches).
    pub git_hash: Option<String>,
}

impl Entry {
    pub fn directory() -> Self {
        Entry {
            kind: EntryKind::Directory,
            transform: Transform::Identity,
            original_size: 0,
            compressed_size: 0,
            content_type: None,
            git_hash: None,
        }
    }

    pub fn inline(data: Vec<u8>, content_type: Option<String>) -> Self {
        let size = data.len() as u64;
        Entry {
            kind: EntryKind::InlineFile { data },
            transform: Transform::Identity,
            original_size: size,
            compressed_size: size,
            content_type,
            git_hash: None,
        }
    }
}

/// One `_redirects`-file rule, ordered within [`Manifest::redirects`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRule {
    pub from: String,
    pub to: String,
    pub status: u16,
    /// Apply even if `from` resolves to a live entry (see Design Notes:
    /// otherwise a live entry always takes precedence over a redirect).
    pub force: bool,
}

/// Statuses a `_redirects` rule is allowed to declare (invariant 6).
pub const ALLOWED_REDIRECT_STATUSES: [u16; 11] =
    [200, 301, 302, 303, 307, 308, 403, 404, 410, 418, 451];

impl RedirectRule {
    pub fn status_is_allowed(&self) -> bool {
        ALLOWED_REDIRECT_STATUSES.contains(&self.status)
    }

    pub fn is_redirect_status(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    /// `*` may only appear as the final path segment.
    pub fn from_pattern_is_valid(&self) -> bool {
        if !self.from.starts_with('/') {
            return false;
        }
        let segments: Vec<&str> = self.from.split('/').collect();
        segments
            .iter()
            .enumerate()
            .all(|(i, s)| *s != "*" || i == segments.len() - 1)
    }
}

/// One `_headers`-file rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    pub path: String,
    pub headers: Vec<(String, Vec<String>)>,
}

/// Header names that are never allowed in a rule, regardless of config
/// allowlist (invariant 7). These are response headers the server itself
/// must control.
pub const UNSAFE_HEADER_NAMES: [&str; 13] = [
    "Accept-Ranges",
    "Age",
    "Allow",
    "Alt-Svc",
    "Connection",
    "Content-Encoding",
    "Content-Length",
    "Content-Range",
    "Date",
    "Location",
    "Server",
    "Trailer",
    "Transfer-Encoding",
    "Upgrade",
];

impl HeaderRule {
    /// Check every header name in this rule against the unsafe set and an
    /// operator-configured allowlist. Called both at ingest time and again
    /// at serve time since the allowlist may have tightened since ingest.
    pub fn validate(&self, allowlist: &[String]) -> std::result::Result<(), String> {
        for (name, _) in &self.headers {
            if UNSAFE_HEADER_NAMES
                .iter()
                .any(|u| u.eq_ignore_ascii_case(name))
            {
                return Err(format!("{name} is a fundamentally unsafe header"));
            }
            if !allowlist.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                return Err(format!("{name} is not in the configured allowlist"));
            }
        }
        Ok(())
    }
}

/// A non-fatal problem recorded during ingest (invalid rule, unsupported
/// archive member, whiteout outside patch mode, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub path: String,
    pub cause: String,
}

/// Per-domain existence and freeze state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainMarker {
    pub exists: bool,
    pub frozen: bool,
}

/// The kind of mutating intent an [`AuditRecord`] captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventKind {
    ManifestCommitted,
    ManifestDeleted,
    DomainFrozen,
    DomainUnfrozen,
}

/// Append-only record of a mutating intent.
///
/// Audit is written *before* the mutation it describes is committed
/// ("captures intent, not outcome") — see [`crate::Error::AuditAppendFailure`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: SnowflakeId,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub domain: String,
    pub project: String,
    pub manifest_snapshot: Option<Box<Manifest>>,
    /// Opaque principal identifier taken from request-scoped context.
    pub principal: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_key_index_roundtrip() {
        let k = SiteKey::index("example.org");
        assert!(k.is_index());
        assert_eq!(k.to_string(), "example.org/.index");
    }

    #[test]
    fn redirect_status_allowlist() {
        let mut r = RedirectRule {
            from: "/old/*".into(),
            to: "/new/:splat".into(),
            status: 301,
            force: false,
        };
        assert!(r.status_is_allowed());
        assert!(r.from_pattern_is_valid());
        r.status = 999;
        assert!(!r.status_is_allowed());
    }

    #[test]
    fn redirect_wildcard_must_be_last_segment() {
        let r = RedirectRule {
            from: "/*/foo".into(),
            to: "/bar".into(),
            status: 301,
            force: false,
        };
        assert!(!r.from_pattern_is_valid());
    }

    #[test]
    fn header_rule_rejects_unsafe_name() {
        let rule = HeaderRule {
            path: "/*".into(),
            headers: vec![("Content-Length".into(), vec!["0".into()])],
        };
        let allowlist = vec!["Content-Length".to_string()];
        assert!(rule.validate(&allowlist).is_err());
    }

    #[test]
    fn header_rule_rejects_name_outside_allowlist() {
        let rule = HeaderRule {
            path: "/*".into(),
            headers: vec![("X-Custom".into(), vec!["1".into()])],
        };
        assert!(rule.validate(&[]).is_err());
        assert!(rule.validate(&["X-Custom".to_string()]).is_ok());
    }
}
