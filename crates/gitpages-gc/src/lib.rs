//! Garbage tracer (§4.7): walks every manifest (current and retained audit
//! snapshots) to build the set of live blob references, then diffs it
//! against the blob enumerator. Report-only — deletion is an operator-gated
//! follow-up this crate does not perform.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gitpages_blob::BlobStore;
use gitpages_storage::{AuditStore, ManifestStore, SearchAuditOptions};
use gitpages_types::Result;

/// One reference to a blob name, kept so a report can explain *why* a blob
/// is live or dangling rather than just listing names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Manifest { domain: String, project: String },
    AuditSnapshot { audit_id: u64 },
}

#[derive(Debug, Default)]
pub struct TraceReport {
    /// Every blob name seen in the store.
    pub all_blobs: BTreeSet<String>,
    /// Blob names referenced by at least one live manifest or retained
    /// audit snapshot.
    pub live_blobs: BTreeMap<String, Vec<Reference>>,
    /// Referenced blob names that the blob store doesn't actually have.
    pub dangling: BTreeSet<String>,
}

impl TraceReport {
    /// `all_blobs \ live_blobs`: candidates an operator could safely delete.
    pub fn garbage_candidates(&self) -> BTreeSet<String> {
        self.all_blobs
            .difference(&self.live_blobs.keys().cloned().collect())
            .cloned()
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.live_blobs.len()
    }

    pub fn garbage_count(&self) -> usize {
        self.garbage_candidates().len()
    }
}

/// Walks every currently-committed manifest plus every audit record holding
/// a manifest snapshot, and diffs the resulting live set against
/// `blobs.enumerate()`. Does not delete anything.
pub async fn trace(
    blobs: &(dyn BlobStore),
    manifests: &(dyn ManifestStore),
    audit: &(dyn AuditStore),
) -> Result<TraceReport> {
    let mut live_blobs: BTreeMap<String, Vec<Reference>> = BTreeMap::new();

    for key in manifests.enumerate_manifests().await? {
        let (manifest, _meta) = manifests
            .get_manifest(&key, gitpages_storage::GetManifestOptions { bypass_cache: true })
            .await?;
        for blob_name in manifest.external_blob_refs() {
            live_blobs.entry(blob_name.to_string()).or_default().push(Reference::Manifest {
                domain: key.domain.clone(),
                project: key.project.clone(),
            });
        }
    }

    for record in audit.search_audit_log(SearchAuditOptions::default()).await? {
        let Some(snapshot) = &record.manifest_snapshot else {
            continue;
        };
        for blob_name in snapshot.external_blob_refs() {
            live_blobs
                .entry(blob_name.to_string())
                .or_default()
                .push(Reference::AuditSnapshot { audit_id: record.id.0 });
        }
    }

    let all_blobs: BTreeSet<String> = blobs.enumerate().await?.into_iter().collect();

    let mut dangling = BTreeSet::new();
    for name in live_blobs.keys() {
        if !all_blobs.contains(name) {
            dangling.insert(name.clone());
        }
    }

    Ok(TraceReport { all_blobs, live_blobs, dangling })
}

/// Convenience wrapper over `Arc<dyn ...>` handles, the shape the server
/// binary actually holds them in.
pub async fn trace_arc(
    blobs: Arc<dyn BlobStore>,
    manifests: Arc<dyn ManifestStore>,
    audit: Arc<dyn AuditStore>,
) -> Result<TraceReport> {
    trace(blobs.as_ref(), manifests.as_ref(), audit.as_ref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use gitpages_blob::BlobMeta;
    use gitpages_storage::{CommitPreconditions, GetManifestOptions, ManifestMeta};
    use gitpages_types::{
        AuditEventKind, AuditRecord, Entry, EntryKind, Error, Manifest, SiteKey, SnowflakeId,
    };
    use std::collections::BTreeMap as StdBTreeMap;
    use std::sync::Mutex as StdMutex;
    use std::time::SystemTime;

    struct MemBlobStore {
        names: Vec<&'static str>,
    }

    #[async_trait]
    impl BlobStore for MemBlobStore {
        async fn put(&self, _name: &str, _bytes: &[u8]) -> gitpages_blob::Result<()> {
            Ok(())
        }
        async fn get(&self, name: &str) -> gitpages_blob::Result<(Vec<u8>, BlobMeta)> {
            Err(Error::ObjectNotFound(name.to_string()))
        }
        async fn delete(&self, _name: &str) -> gitpages_blob::Result<()> {
            Ok(())
        }
        async fn exists(&self, name: &str) -> gitpages_blob::Result<bool> {
            Ok(self.names.contains(&name))
        }
        async fn enumerate(&self) -> gitpages_blob::Result<Vec<String>> {
            Ok(self.names.iter().map(|s| s.to_string()).collect())
        }
    }

    struct MemManifestStore {
        manifests: StdMutex<StdBTreeMap<String, Manifest>>,
    }

    #[async_trait]
    impl ManifestStore for MemManifestStore {
        async fn get_manifest(
            &self,
            key: &SiteKey,
            _opts: GetManifestOptions,
        ) -> gitpages_storage::Result<(Manifest, ManifestMeta)> {
            let manifests = self.manifests.lock().unwrap();
            let manifest = manifests
                .get(&key.to_string())
                .cloned()
                .ok_or_else(|| Error::ObjectNotFound(key.to_string()))?;
            Ok((manifest, ManifestMeta { etag: "e".into(), mtime: SystemTime::now() }))
        }
        async fn stage_manifest(&self, _manifest: &Manifest) -> gitpages_storage::Result<String> {
            Ok("staged".into())
        }
        async fn commit_manifest(
            &self,
            _key: &SiteKey,
            _staged_id: &str,
            _preconditions: CommitPreconditions,
        ) -> gitpages_storage::Result<ManifestMeta> {
            unimplemented!("not exercised by these tests")
        }
        async fn delete_manifest(
            &self,
            _key: &SiteKey,
            _preconditions: CommitPreconditions,
        ) -> gitpages_storage::Result<()> {
            unimplemented!("not exercised by these tests")
        }
        async fn list_manifests(&self, _domain: &str) -> gitpages_storage::Result<Vec<String>> {
            Ok(vec![])
        }
        async fn enumerate_manifests(&self) -> gitpages_storage::Result<Vec<SiteKey>> {
            Ok(self
                .manifests
                .lock()
                .unwrap()
                .keys()
                .map(|k| {
                    let (domain, project) = k.split_once('/').unwrap();
                    SiteKey::new(domain, project)
                })
                .collect())
        }
    }

    struct MemAuditStore {
        records: Vec<AuditRecord>,
    }

    #[async_trait]
    impl AuditStore for MemAuditStore {
        async fn append_audit_log(&self, _record: &AuditRecord) -> gitpages_storage::Result<()> {
            Ok(())
        }
        async fn query_audit_log(&self, _id: SnowflakeId) -> gitpages_storage::Result<Option<AuditRecord>> {
            Ok(None)
        }
        async fn search_audit_log(
            &self,
            _opts: SearchAuditOptions,
        ) -> gitpages_storage::Result<Vec<AuditRecord>> {
            Ok(self.records.clone())
        }
    }

    fn external_entry(blob_name: &str) -> Entry {
        Entry {
            kind: EntryKind::ExternalFile { blob_name: blob_name.to_string() },
            transform: gitpages_types::Transform::Identity,
            original_size: 100,
            compressed_size: 100,
            content_type: None,
            git_hash: None,
        }
    }

    #[tokio::test]
    async fn referenced_blob_that_exists_is_live_not_garbage() {
        let mut manifest = Manifest::empty();
        manifest.contents.insert("big.bin".to_string(), external_entry("sha256-aaa"));

        let mut manifests = StdBTreeMap::new();
        manifests.insert("example.org/.index".to_string(), manifest);

        let report = trace(
            &MemBlobStore { names: vec!["sha256-aaa", "sha256-bbb"] },
            &MemManifestStore { manifests: StdMutex::new(manifests) },
            &MemAuditStore { records: vec![] },
        )
        .await
        .unwrap();

        assert!(report.live_blobs.contains_key("sha256-aaa"));
        assert!(report.garbage_candidates().contains("sha256-bbb"));
        assert!(!report.garbage_candidates().contains("sha256-aaa"));
    }

    #[tokio::test]
    async fn reference_to_absent_blob_is_reported_dangling() {
        let mut manifest = Manifest::empty();
        manifest.contents.insert("missing.bin".to_string(), external_entry("sha256-ghost"));
        let mut manifests = StdBTreeMap::new();
        manifests.insert("example.org/.index".to_string(), manifest);

        let report = trace(
            &MemBlobStore { names: vec![] },
            &MemManifestStore { manifests: StdMutex::new(manifests) },
            &MemAuditStore { records: vec![] },
        )
        .await
        .unwrap();

        assert!(report.dangling.contains("sha256-ghost"));
    }

    #[tokio::test]
    async fn audit_snapshot_refs_count_as_live() {
        let mut snapshot = Manifest::empty();
        snapshot.contents.insert("old.bin".to_string(), external_entry("sha256-ccc"));

        let record = AuditRecord {
            id: SnowflakeId::from_parts(1, 1, 1),
            timestamp: Utc::now(),
            kind: AuditEventKind::ManifestDeleted,
            domain: "example.org".to_string(),
            project: ".index".to_string(),
            manifest_snapshot: Some(Box::new(snapshot)),
            principal: None,
        };

        let report = trace(
            &MemBlobStore { names: vec!["sha256-ccc"] },
            &MemManifestStore { manifests: StdMutex::new(StdBTreeMap::new()) },
            &MemAuditStore { records: vec![record] },
        )
        .await
        .unwrap();

        assert!(report.live_blobs.contains_key("sha256-ccc"));
        assert!(report.garbage_candidates().is_empty());
    }
}
