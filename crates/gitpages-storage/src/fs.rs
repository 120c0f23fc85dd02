use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use gitpages_blob::{BlobMeta, BlobStore, FsBlobStore};
use gitpages_types::{AuditRecord, DomainMarker, Error, Manifest, SiteKey, SnowflakeId};

use crate::{
    decode_manifest, encode_manifest, AuditStore, CommitPreconditions, DomainStore,
    FeatureStore, GetManifestOptions, HasAtomicCas, ManifestMeta, ManifestStore, Result,
    SearchAuditOptions,
};

/// Filesystem object-store driver. Lays out the root exactly as the logical
/// layout in the external interfaces design describes:
/// `blob/`, `site/<domain>/<project>`, `site/<domain>/.exists`,
/// `site/<domain>/.frozen`, `dirty/<hex>`, `meta/feature/<name>`,
/// `audit/<hex-snowflake>`.
pub struct FsDriver {
    root: PathBuf,
    blobs: Arc<FsBlobStore>,
}

impl FsDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let blobs = Arc::new(FsBlobStore::new(root.join("blob")));
        FsDriver { root, blobs }
    }

    fn site_dir(&self, domain: &str) -> PathBuf {
        self.root.join("site").join(domain)
    }

    fn manifest_path(&self, key: &SiteKey) -> PathBuf {
        self.site_dir(&key.domain).join(&key.project)
    }

    fn exists_marker_path(&self, domain: &str) -> PathBuf {
        self.site_dir(domain).join(".exists")
    }

    fn frozen_marker_path(&self, domain: &str) -> PathBuf {
        self.site_dir(domain).join(".frozen")
    }

    fn dirty_path(&self, staged_id: &str) -> PathBuf {
        self.root.join("dirty").join(staged_id)
    }

    fn feature_path(&self, name: &str) -> PathBuf {
        self.root.join("meta").join("feature").join(name)
    }

    fn audit_path(&self, id: SnowflakeId) -> PathBuf {
        self.root.join("audit").join(id.as_hex())
    }

    async fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await
    }

    fn etag_of(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }
}

#[async_trait]
impl BlobStore for FsDriver {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.put(name, bytes).await
    }
    async fn get(&self, name: &str) -> Result<(Vec<u8>, BlobMeta)> {
        self.blobs.get(name).await
    }
    async fn delete(&self, name: &str) -> Result<()> {
        self.blobs.delete(name).await
    }
    async fn exists(&self, name: &str) -> Result<bool> {
        self.blobs.exists(name).await
    }
    async fn enumerate(&self) -> Result<Vec<String>> {
        self.blobs.enumerate().await
    }
}

#[async_trait]
impl ManifestStore for FsDriver {
    async fn get_manifest(
        &self,
        key: &SiteKey,
        _opts: GetManifestOptions,
    ) -> Result<(Manifest, ManifestMeta)> {
        let path = self.manifest_path(key);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ObjectNotFound(key.to_string())
            } else {
                Error::Transient(format!("read manifest {key}: {e}"))
            }
        })?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::Transient(format!("stat manifest {key}: {e}")))?;
        let manifest = decode_manifest(&bytes).map_err(Error::Other)?;
        Ok((
            manifest,
            ManifestMeta {
                etag: Self::etag_of(&bytes),
                mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            },
        ))
    }

    async fn stage_manifest(&self, manifest: &Manifest) -> Result<String> {
        let bytes = encode_manifest(manifest).map_err(Error::Other)?;
        let staged_id = Self::etag_of(&bytes);
        Self::write_atomic(&self.dirty_path(&staged_id), &bytes)
            .await
            .map_err(|e| Error::Transient(format!("stage manifest: {e}")))?;
        Ok(staged_id)
    }

    async fn commit_manifest(
        &self,
        key: &SiteKey,
        staged_id: &str,
        preconditions: CommitPreconditions,
    ) -> Result<ManifestMeta> {
        if matches!(self.check_domain(&key.domain).await?, DomainMarker { frozen: true, .. }) {
            return Err(Error::DomainFrozen(key.domain.clone()));
        }

        let path = self.manifest_path(key);

        if preconditions.if_unmodified_since.is_some() || preconditions.if_match.is_some() {
            match tokio::fs::metadata(&path).await {
                Ok(meta) => {
                    let current_bytes = tokio::fs::read(&path)
                        .await
                        .map_err(|e| Error::Transient(format!("read current manifest: {e}")))?;
                    let current_etag = Self::etag_of(&current_bytes);
                    if let Some(if_match) = &preconditions.if_match {
                        if if_match != &current_etag {
                            return Err(Error::PreconditionFailed(format!(
                                "if_match {if_match} != current etag {current_etag}"
                            )));
                        }
                    }
                    if let Some(since) = preconditions.if_unmodified_since {
                        let mtime = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                        if mtime > since {
                            return Err(Error::PreconditionFailed(format!(
                                "manifest {key} modified since precondition"
                            )));
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::PreconditionFailed(format!(
                        "manifest {key} does not exist yet"
                    )));
                }
                Err(e) => return Err(Error::Transient(format!("stat manifest {key}: {e}"))),
            }
        }

        let staged_path = self.dirty_path(staged_id);
        let bytes = tokio::fs::read(&staged_path)
            .await
            .map_err(|e| Error::Transient(format!("read staged manifest {staged_id}: {e}")))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Transient(format!("mkdir site dir: {e}")))?;
        }
        tokio::fs::rename(&staged_path, &path)
            .await
            .map_err(|e| Error::Transient(format!("commit manifest {key}: {e}")))?;

        self.create_domain(&key.domain).await?;

        Ok(ManifestMeta {
            etag: Self::etag_of(&bytes),
            mtime: std::time::SystemTime::now(),
        })
    }

    async fn delete_manifest(
        &self,
        key: &SiteKey,
        preconditions: CommitPreconditions,
    ) -> Result<()> {
        if matches!(self.check_domain(&key.domain).await?, DomainMarker { frozen: true, .. }) {
            return Err(Error::DomainFrozen(key.domain.clone()));
        }
        let path = self.manifest_path(key);

        if let Some(if_match) = &preconditions.if_match {
            let current_bytes = tokio::fs::read(&path)
                .await
                .map_err(|_| Error::ObjectNotFound(key.to_string()))?;
            let current_etag = Self::etag_of(&current_bytes);
            if if_match != &current_etag {
                return Err(Error::PreconditionFailed(format!(
                    "if_match {if_match} != current etag {current_etag}"
                )));
            }
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::ObjectNotFound(key.to_string()))
            }
            Err(e) => Err(Error::Transient(format!("delete manifest {key}: {e}"))),
        }
    }

    async fn list_manifests(&self, domain: &str) -> Result<Vec<String>> {
        let dir = self.site_dir(domain);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Transient(format!("list manifests for {domain}: {e}"))),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Transient(format!("list manifests for {domain}: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name != ".exists" && name != ".frozen" {
                out.push(name);
            }
        }
        Ok(out)
    }

    async fn enumerate_manifests(&self) -> Result<Vec<SiteKey>> {
        let site_root = self.root.join("site");
        let mut out = Vec::new();
        let mut domains = match tokio::fs::read_dir(&site_root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Transient(format!("enumerate manifests: {e}"))),
        };
        while let Some(domain_entry) = domains
            .next_entry()
            .await
            .map_err(|e| Error::Transient(format!("enumerate manifests: {e}")))?
        {
            let domain = domain_entry.file_name().to_string_lossy().to_string();
            for project in self.list_manifests(&domain).await? {
                out.push(SiteKey::new(domain.clone(), project));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl DomainStore for FsDriver {
    async fn check_domain(&self, domain: &str) -> Result<DomainMarker> {
        let exists = tokio::fs::try_exists(self.exists_marker_path(domain))
            .await
            .unwrap_or(false)
            || !self.list_manifests(domain).await?.is_empty();
        let frozen = tokio::fs::try_exists(self.frozen_marker_path(domain))
            .await
            .unwrap_or(false);
        Ok(DomainMarker { exists, frozen })
    }

    async fn create_domain(&self, domain: &str) -> Result<()> {
        Self::write_atomic(&self.exists_marker_path(domain), b"")
            .await
            .map_err(|e| Error::Transient(format!("create domain marker for {domain}: {e}")))
    }

    async fn freeze_domain(&self, domain: &str, frozen: bool) -> Result<()> {
        let path = self.frozen_marker_path(domain);
        if frozen {
            Self::write_atomic(&path, b"")
                .await
                .map_err(|e| Error::Transient(format!("freeze domain {domain}: {e}")))
        } else {
            match tokio::fs::remove_file(&path).await {
                Ok(()) | Err(_) => Ok(()),
            }
        }
    }
}

#[async_trait]
impl AuditStore for FsDriver {
    async fn append_audit_log(&self, record: &AuditRecord) -> Result<()> {
        let path = self.audit_path(record.id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::AuditAppendFailure(format!(
                "id collision for audit record {}",
                record.id
            )));
        }
        let bytes = serde_json::to_vec(record)
            .map_err(|e| Error::AuditAppendFailure(format!("encode audit record: {e}")))?;
        Self::write_atomic(&path, &bytes)
            .await
            .map_err(|e| Error::AuditAppendFailure(format!("write audit record: {e}")))
    }

    async fn query_audit_log(&self, id: SnowflakeId) -> Result<Option<AuditRecord>> {
        match tokio::fs::read(self.audit_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                Error::Transient(format!("decode audit record {id}: {e}"))
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Transient(format!("read audit record {id}: {e}"))),
        }
    }

    async fn search_audit_log(&self, opts: SearchAuditOptions) -> Result<Vec<AuditRecord>> {
        let dir = self.root.join("audit");
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Transient(format!("search audit log: {e}"))),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Transient(format!("search audit log: {e}")))?
        {
            let bytes = tokio::fs::read(entry.path())
                .await
                .map_err(|e| Error::Transient(format!("read audit record: {e}")))?;
            let record: AuditRecord = serde_json::from_slice(&bytes)
                .map_err(|e| Error::Transient(format!("decode audit record: {e}")))?;
            if let Some(since) = opts.since {
                if record.timestamp < since {
                    continue;
                }
            }
            if let Some(until) = opts.until {
                if record.timestamp > until {
                    continue;
                }
            }
            out.push(record);
        }
        out.sort_by_key(|r| r.id);
        Ok(out)
    }
}

#[async_trait]
impl FeatureStore for FsDriver {
    async fn has_feature(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.feature_path(name))
            .await
            .unwrap_or(false))
    }

    async fn enable_feature(&self, name: &str) -> Result<()> {
        Self::write_atomic(&self.feature_path(name), b"")
            .await
            .map_err(|e| Error::Transient(format!("enable feature {name}: {e}")))
    }
}

#[async_trait]
impl HasAtomicCas for FsDriver {
    async fn has_atomic_cas(&self) -> bool {
        // Every write is staged to a sibling path and renamed into place;
        // same-filesystem rename is atomic on its own, no lock needed.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SiteKey {
        SiteKey::new("example.org", "blog")
    }

    #[tokio::test]
    async fn stage_then_commit_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FsDriver::new(dir.path());

        let manifest = Manifest::empty();
        let staged = driver.stage_manifest(&manifest).await.unwrap();
        driver
            .commit_manifest(&key(), &staged, CommitPreconditions::default())
            .await
            .unwrap();

        let (loaded, _) = driver
            .get_manifest(&key(), GetManifestOptions::default())
            .await
            .unwrap();
        assert_eq!(loaded, manifest);
    }

    #[tokio::test]
    async fn commit_creates_domain_marker() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FsDriver::new(dir.path());
        let staged = driver.stage_manifest(&Manifest::empty()).await.unwrap();
        driver
            .commit_manifest(&key(), &staged, CommitPreconditions::default())
            .await
            .unwrap();

        let marker = driver.check_domain("example.org").await.unwrap();
        assert!(marker.exists);
        assert!(!marker.frozen);
    }

    #[tokio::test]
    async fn precondition_mismatch_is_precondition_failed() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FsDriver::new(dir.path());
        let staged = driver.stage_manifest(&Manifest::empty()).await.unwrap();
        driver
            .commit_manifest(&key(), &staged, CommitPreconditions::default())
            .await
            .unwrap();

        let staged2 = driver.stage_manifest(&Manifest::empty()).await.unwrap();
        let err = driver
            .commit_manifest(
                &key(),
                &staged2,
                CommitPreconditions {
                    if_match: Some("bogus-etag".into()),
                    if_unmodified_since: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn frozen_domain_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FsDriver::new(dir.path());
        driver.create_domain("example.org").await.unwrap();
        driver.freeze_domain("example.org", true).await.unwrap();

        let staged = driver.stage_manifest(&Manifest::empty()).await.unwrap();
        let err = driver
            .commit_manifest(&key(), &staged, CommitPreconditions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DomainFrozen(_)));
    }

    #[tokio::test]
    async fn audit_log_append_and_query() {
        use gitpages_types::{AuditEventKind, SnowflakeId};

        let dir = tempfile::tempdir().unwrap();
        let driver = FsDriver::new(dir.path());
        let record = AuditRecord {
            id: SnowflakeId::from_parts(1_700_000_000_000, 1, 0),
            timestamp: chrono::Utc::now(),
            kind: AuditEventKind::ManifestCommitted,
            domain: "example.org".into(),
            project: ".index".into(),
            manifest_snapshot: None,
            principal: None,
        };
        driver.append_audit_log(&record).await.unwrap();

        let loaded = driver.query_audit_log(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.domain, "example.org");

        let dup_err = driver.append_audit_log(&record).await.unwrap_err();
        assert!(matches!(dup_err, Error::AuditAppendFailure(_)));
    }

    #[tokio::test]
    async fn feature_flags_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FsDriver::new(dir.path());
        assert!(!driver.has_feature("check-domain-marker").await.unwrap());
        driver.enable_feature("check-domain-marker").await.unwrap();
        assert!(driver.has_feature("check-domain-marker").await.unwrap());
    }
}
