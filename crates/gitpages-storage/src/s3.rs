//! S3-compatible backend. Manifests, domain markers, feature flags, and audit
//! records all live as ordinary objects under the same logical keys the
//! filesystem driver uses for its paths; blobs reuse the same
//! `blob/<algo>/<aa>/<bb>/<rest>` key shape.
//!
//! Unlike the filesystem driver, this backend cannot guarantee a true atomic
//! compare-and-swap on every S3-compatible target — conditional `PUT` support
//! (`If-Match`) varies by provider, so [`S3Driver::has_atomic_cas`] reports
//! this conservatively based on the configured `conditional_writes` flag
//! rather than assuming it.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sha2::{Digest, Sha256};

use gitpages_blob::{shard_path, BlobMeta, BlobStore};
use gitpages_types::{AuditRecord, DomainMarker, Error, Manifest, SiteKey, SnowflakeId};

use crate::{
    decode_manifest, encode_manifest, AuditStore, CommitPreconditions, DomainStore,
    FeatureStore, GetManifestOptions, HasAtomicCas, ManifestMeta, ManifestStore, Result,
    SearchAuditOptions,
};

pub struct S3Driver {
    client: Client,
    bucket: String,
    prefix: String,
    /// Whether the target is known to honor conditional `PUT` (`If-Match`).
    /// Most S3-compatible object stores besides AWS itself do not.
    conditional_writes: bool,
}

impl S3Driver {
    pub async fn from_env(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let shared_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&shared_config);
        S3Driver {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            conditional_writes: false,
        }
    }

    pub fn with_conditional_writes(mut self, enabled: bool) -> Self {
        self.conditional_writes = enabled;
        self
    }

    fn key(&self, suffix: &str) -> String {
        if self.prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), suffix)
        }
    }

    fn blob_key(&self, name: &str) -> Option<String> {
        let (algo, aa, bb, rest) = shard_path(name)?;
        Some(self.key(&format!("blob/{algo}/{aa}/{bb}/{rest}")))
    }

    fn manifest_key(&self, key: &SiteKey) -> String {
        self.key(&format!("site/{}/{}", key.domain, key.project))
    }

    fn exists_marker_key(&self, domain: &str) -> String {
        self.key(&format!("site/{domain}/.exists"))
    }

    fn frozen_marker_key(&self, domain: &str) -> String {
        self.key(&format!("site/{domain}/.frozen"))
    }

    fn dirty_key(&self, staged_id: &str) -> String {
        self.key(&format!("dirty/{staged_id}"))
    }

    fn feature_key(&self, name: &str) -> String {
        self.key(&format!("meta/feature/{name}"))
    }

    fn audit_key(&self, id: SnowflakeId) -> String {
        self.key(&format!("audit/{}", id.as_hex()))
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error().map(|se| se.is_no_such_key()) {
                Some(true) => Error::ObjectNotFound(key.to_string()),
                _ => Error::Transient(format!("s3 get_object {key}: {e}")),
            })?;
        let bytes = out
            .body
            .collect()
            .await
            .map_err(|e| Error::Transient(format!("s3 read body {key}: {e}")))?
            .into_bytes()
            .to_vec();
        Ok(bytes)
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| Error::Transient(format!("s3 put_object {key}: {e}")))?;
        Ok(())
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => match e.as_service_error().map(|se| se.is_not_found()) {
                Some(true) => Ok(false),
                _ => Err(Error::Transient(format!("s3 head_object {key}: {e}"))),
            },
        }
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("s3 delete_object {key}: {e}")))?;
        Ok(())
    }

    fn etag_of(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }
}

#[async_trait]
impl BlobStore for S3Driver {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let key = self
            .blob_key(name)
            .ok_or_else(|| Error::Other(anyhow::anyhow!("malformed blob name: {name}")))?;
        if self.object_exists(&key).await? {
            return Ok(());
        }
        self.put_object(&key, bytes.to_vec()).await
    }

    async fn get(&self, name: &str) -> Result<(Vec<u8>, BlobMeta)> {
        let key = self
            .blob_key(name)
            .ok_or_else(|| Error::Other(anyhow::anyhow!("malformed blob name: {name}")))?;
        let bytes = self.get_object(&key).await?;
        let size = bytes.len() as u64;
        Ok((
            bytes,
            BlobMeta {
                size,
                last_modified: std::time::SystemTime::now(),
            },
        ))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let key = self
            .blob_key(name)
            .ok_or_else(|| Error::Other(anyhow::anyhow!("malformed blob name: {name}")))?;
        match self.delete_object(&key).await {
            Ok(()) => Ok(()),
            Err(Error::ObjectNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let Some(key) = self.blob_key(name) else {
            return Ok(false);
        };
        self.object_exists(&key).await
    }

    async fn enumerate(&self) -> Result<Vec<String>> {
        let prefix = self.key("blob/");
        let mut names = Vec::new();
        let mut stream = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();
        use futures_util::StreamExt;
        while let Some(page) = stream.next().await {
            let page = page.map_err(|e| Error::Transient(format!("s3 list_objects: {e}")))?;
            for obj in page.contents() {
                if let Some(key) = obj.key() {
                    if let Some(rest) = key.strip_prefix(&prefix) {
                        let mut parts = rest.splitn(3, '/');
                        if let (Some(algo), Some(aa), Some(bbrest)) =
                            (parts.next(), parts.next(), parts.next())
                        {
                            if let Some((bb, r)) = bbrest.split_once('/') {
                                names.push(format!("{algo}-{aa}{bb}{r}"));
                            }
                        }
                    }
                }
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl ManifestStore for S3Driver {
    async fn get_manifest(
        &self,
        key: &SiteKey,
        _opts: GetManifestOptions,
    ) -> Result<(Manifest, ManifestMeta)> {
        let bytes = self.get_object(&self.manifest_key(key)).await?;
        let manifest = decode_manifest(&bytes).map_err(Error::Other)?;
        Ok((
            manifest,
            ManifestMeta {
                etag: Self::etag_of(&bytes),
                mtime: std::time::SystemTime::now(),
            },
        ))
    }

    async fn stage_manifest(&self, manifest: &Manifest) -> Result<String> {
        let bytes = encode_manifest(manifest).map_err(Error::Other)?;
        let staged_id = Self::etag_of(&bytes);
        self.put_object(&self.dirty_key(&staged_id), bytes).await?;
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

        if preconditions.if_match.is_some() || preconditions.if_unmodified_since.is_some() {
            if !self.conditional_writes {
                tracing::warn!(
                    domain = %key.domain,
                    "best-effort CAS: backend does not guarantee conditional writes"
                );
            }
            match self.get_object(&self.manifest_key(key)).await {
                Ok(current) => {
                    let current_etag = Self::etag_of(&current);
                    if let Some(if_match) = &preconditions.if_match {
                        if if_match != &current_etag {
                            return Err(Error::PreconditionFailed(format!(
                                "if_match {if_match} != current etag {current_etag}"
                            )));
                        }
                    }
                }
                Err(Error::ObjectNotFound(_)) => {
                    return Err(Error::PreconditionFailed(format!(
                        "manifest {key} does not exist yet"
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        let bytes = self.get_object(&self.dirty_key(staged_id)).await?;
        self.put_object(&self.manifest_key(key), bytes.clone()).await?;
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
        if let Some(if_match) = &preconditions.if_match {
            let current = self.get_object(&self.manifest_key(key)).await?;
            let current_etag = Self::etag_of(&current);
            if if_match != &current_etag {
                return Err(Error::PreconditionFailed(format!(
                    "if_match {if_match} != current etag {current_etag}"
                )));
            }
        }
        self.delete_object(&self.manifest_key(key)).await
    }

    async fn list_manifests(&self, domain: &str) -> Result<Vec<String>> {
        let prefix = self.key(&format!("site/{domain}/"));
        let mut out = Vec::new();
        let mut stream = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();
        use futures_util::StreamExt;
        while let Some(page) = stream.next().await {
            let page = page.map_err(|e| Error::Transient(format!("s3 list_objects: {e}")))?;
            for obj in page.contents() {
                if let Some(k) = obj.key() {
                    if let Some(rest) = k.strip_prefix(&prefix) {
                        if rest != ".exists" && rest != ".frozen" && !rest.is_empty() {
                            out.push(rest.to_string());
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    async fn enumerate_manifests(&self) -> Result<Vec<SiteKey>> {
        let prefix = self.key("site/");
        let mut domains = std::collections::BTreeSet::new();
        let mut stream = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();
        use futures_util::StreamExt;
        while let Some(page) = stream.next().await {
            let page = page.map_err(|e| Error::Transient(format!("s3 list_objects: {e}")))?;
            for obj in page.contents() {
                if let Some(k) = obj.key() {
                    if let Some(rest) = k.strip_prefix(&prefix) {
                        if let Some((domain, _)) = rest.split_once('/') {
                            domains.insert(domain.to_string());
                        }
                    }
                }
            }
        }
        let mut out = Vec::new();
        for domain in domains {
            for project in self.list_manifests(&domain).await? {
                out.push(SiteKey::new(domain.clone(), project));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl DomainStore for S3Driver {
    async fn check_domain(&self, domain: &str) -> Result<DomainMarker> {
        let exists = self.object_exists(&self.exists_marker_key(domain)).await?
            || !self.list_manifests(domain).await?.is_empty();
        let frozen = self.object_exists(&self.frozen_marker_key(domain)).await?;
        Ok(DomainMarker { exists, frozen })
    }

    async fn create_domain(&self, domain: &str) -> Result<()> {
        self.put_object(&self.exists_marker_key(domain), Vec::new()).await
    }

    async fn freeze_domain(&self, domain: &str, frozen: bool) -> Result<()> {
        if frozen {
            self.put_object(&self.frozen_marker_key(domain), Vec::new()).await
        } else {
            match self.delete_object(&self.frozen_marker_key(domain)).await {
                Ok(()) | Err(_) => Ok(()),
            }
        }
    }
}

#[async_trait]
impl AuditStore for S3Driver {
    async fn append_audit_log(&self, record: &AuditRecord) -> Result<()> {
        let key = self.audit_key(record.id);
        if self.object_exists(&key).await? {
            return Err(Error::AuditAppendFailure(format!(
                "id collision for audit record {}",
                record.id
            )));
        }
        let bytes = serde_json::to_vec(record)
            .map_err(|e| Error::AuditAppendFailure(format!("encode audit record: {e}")))?;
        self.put_object(&key, bytes)
            .await
            .map_err(|e| Error::AuditAppendFailure(format!("write audit record: {e}")))
    }

    async fn query_audit_log(&self, id: SnowflakeId) -> Result<Option<AuditRecord>> {
        match self.get_object(&self.audit_key(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                Error::Transient(format!("decode audit record {id}: {e}"))
            })?)),
            Err(Error::ObjectNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn search_audit_log(&self, opts: SearchAuditOptions) -> Result<Vec<AuditRecord>> {
        let prefix = self.key("audit/");
        let mut out = Vec::new();
        let mut stream = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();
        use futures_util::StreamExt;
        while let Some(page) = stream.next().await {
            let page = page.map_err(|e| Error::Transient(format!("s3 list_objects: {e}")))?;
            for obj in page.contents() {
                let Some(k) = obj.key() else { continue };
                let bytes = self.get_object(k).await?;
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
        }
        out.sort_by_key(|r| r.id);
        Ok(out)
    }
}

#[async_trait]
impl FeatureStore for S3Driver {
    async fn has_feature(&self, name: &str) -> Result<bool> {
        self.object_exists(&self.feature_key(name)).await
    }

    async fn enable_feature(&self, name: &str) -> Result<()> {
        self.put_object(&self.feature_key(name), Vec::new()).await
    }
}

#[async_trait]
impl HasAtomicCas for S3Driver {
    async fn has_atomic_cas(&self) -> bool {
        self.conditional_writes
    }
}
