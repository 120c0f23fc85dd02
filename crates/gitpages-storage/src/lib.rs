//! Object-store driver contract (§4.8): one uniform interface over a
//! filesystem or S3-compatible backend, exposing blob, manifest, domain, and
//! audit-log primitives plus capability probing (`HasAtomicCAS`, `HasFeature`).
//!
//! The manifest wire format is deterministic JSON rather than literal
//! protobuf — see DESIGN.md for why; `BTreeMap<String, Entry>` already
//! guarantees key order, so `serde_json::to_vec` is byte-identical across
//! runs for the same manifest value.

use std::time::SystemTime;

use async_trait::async_trait;
use gitpages_types::{AuditRecord, DomainMarker, Manifest, SiteKey, SnowflakeId};

pub use gitpages_blob::{blob_name, Algo, BlobMeta, BlobStore};

mod fs;
#[cfg(feature = "s3")]
pub mod s3;

pub use fs::FsDriver;

pub type Result<T> = std::result::Result<T, gitpages_types::Error>;

/// Opaque version markers returned alongside a loaded manifest, used as CAS
/// preconditions on the next commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestMeta {
    pub etag: String,
    pub mtime: SystemTime,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetManifestOptions {
    /// Skip any caching layer in front of this driver and read the backend
    /// directly. The raw FS/S3 drivers have no cache of their own, so this
    /// is a no-op for them; [`gitpages_cache`]'s wrapper is what honors it.
    pub bypass_cache: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CommitPreconditions {
    pub if_unmodified_since: Option<SystemTime>,
    pub if_match: Option<String>,
}

#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn get_manifest(
        &self,
        key: &SiteKey,
        opts: GetManifestOptions,
    ) -> Result<(Manifest, ManifestMeta)>;

    /// Writes the encoded manifest to a hash-named temporary object and
    /// returns its staging id, ready for [`Self::commit_manifest`].
    async fn stage_manifest(&self, manifest: &Manifest) -> Result<String>;

    /// Commits a previously staged manifest under `key`, evaluating
    /// `preconditions` per the CAS protocol (§4.3). On success, invalidates
    /// any cache entry for `key` (handled by the caching wrapper, not here).
    async fn commit_manifest(
        &self,
        key: &SiteKey,
        staged_id: &str,
        preconditions: CommitPreconditions,
    ) -> Result<ManifestMeta>;

    async fn delete_manifest(&self, key: &SiteKey, preconditions: CommitPreconditions)
        -> Result<()>;

    /// Project names published under `domain`.
    async fn list_manifests(&self, domain: &str) -> Result<Vec<String>>;

    async fn enumerate_manifests(&self) -> Result<Vec<SiteKey>>;
}

#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn check_domain(&self, domain: &str) -> Result<DomainMarker>;
    async fn create_domain(&self, domain: &str) -> Result<()>;
    async fn freeze_domain(&self, domain: &str, frozen: bool) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct SearchAuditOptions {
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub until: Option<chrono::DateTime<chrono::Utc>>,
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Keyed by id; an id collision is the caller's bug to abort on, not
    /// this store's to paper over.
    async fn append_audit_log(&self, record: &AuditRecord) -> Result<()>;
    async fn query_audit_log(&self, id: SnowflakeId) -> Result<Option<AuditRecord>>;
    /// Linear scan of the `audit/` prefix filtered by `since`/`until`
    /// (§10 supplemented feature — every other driver primitive is fully
    /// specified, but this one's filtering semantics were only implied).
    async fn search_audit_log(&self, opts: SearchAuditOptions) -> Result<Vec<AuditRecord>>;
}

#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn has_feature(&self, name: &str) -> Result<bool>;
    /// §9 Design Notes: enabling `check-domain-marker` only affects domains
    /// created from this point forward; existing domains are not backfilled
    /// automatically.
    async fn enable_feature(&self, name: &str) -> Result<()>;
}

/// Whether this backend supports a true atomic CAS write (§4.3). FS reports
/// `true` unconditionally: every write lands via a same-filesystem
/// write-then-rename, which POSIX guarantees is atomic regardless of lock
/// availability. S3 conservatively declares itself unavailable unless the
/// deployment is known to guarantee `If-Match`.
#[async_trait]
pub trait HasAtomicCas: Send + Sync {
    async fn has_atomic_cas(&self) -> bool;
}

/// The full driver contract a backend implements.
pub trait ObjectStoreDriver:
    BlobStore + ManifestStore + DomainStore + AuditStore + FeatureStore + HasAtomicCas
{
}

impl<T> ObjectStoreDriver for T where
    T: BlobStore + ManifestStore + DomainStore + AuditStore + FeatureStore + HasAtomicCas
{
}

/// Deterministically encodes a manifest for staging/commit and for hashing
/// into a staged-object name.
pub fn encode_manifest(manifest: &Manifest) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(manifest)?)
}

pub fn decode_manifest(bytes: &[u8]) -> anyhow::Result<Manifest> {
    Ok(serde_json::from_slice(bytes)?)
}
