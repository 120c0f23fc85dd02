//! Blob tier: no negative caching, no conditional reload — blobs are
//! content-addressed and immutable, so a cache hit never needs revalidation
//! against the backend; the only question is whether it's still resident.

use std::sync::Arc;

use async_trait::async_trait;
use gitpages_config::CacheTierConfig;
use gitpages_storage::{BlobMeta, BlobStore};
use gitpages_types::{Error, Result};

use crate::Cache;

#[derive(Clone)]
struct CachedBlob {
    result: BlobOutcome,
}

#[derive(Clone)]
enum BlobOutcome {
    Found(Arc<Vec<u8>>, BlobMeta),
    NotFound,
}

fn weigh(entry: &CachedBlob) -> u64 {
    match &entry.result {
        BlobOutcome::Found(bytes, _) => bytes.len() as u64,
        BlobOutcome::NotFound => 1,
    }
}

/// Wraps a [`BlobStore`] with the blob-tier cache in front of `get`.
/// `put`/`delete`/`exists`/`enumerate` pass through uncached — blobs are
/// write-once and GC needs an authoritative enumeration.
pub struct CachedBlobStore<S> {
    inner: Arc<S>,
    cache: Arc<Cache<String, CachedBlob>>,
}

impl<S> CachedBlobStore<S>
where
    S: BlobStore + 'static,
{
    pub fn new(inner: Arc<S>, config: CacheTierConfig) -> Self {
        CachedBlobStore {
            inner,
            cache: Arc::new(Cache::new(config)),
        }
    }

    pub fn counters(&self) -> crate::CacheCountersSnapshot {
        self.cache.counters()
    }
}

#[async_trait]
impl<S> BlobStore for CachedBlobStore<S>
where
    S: BlobStore + 'static,
{
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let result = self.inner.put(name, bytes).await;
        if result.is_ok() {
            self.cache.invalidate(&name.to_string());
        }
        result
    }

    async fn get(&self, name: &str) -> Result<(Vec<u8>, BlobMeta)> {
        let inner = self.inner.clone();
        let key = name.to_string();
        let load_key = key.clone();
        let entry = self
            .cache
            .get_or_load(key, false, weigh, move |_prev| {
                let inner = inner.clone();
                let name = load_key.clone();
                async move {
                    match inner.get(&name).await {
                        Ok((bytes, meta)) => CachedBlob {
                            result: BlobOutcome::Found(Arc::new(bytes), meta),
                        },
                        Err(_) => CachedBlob {
                            result: BlobOutcome::NotFound,
                        },
                    }
                }
            })
            .await;

        match entry.result {
            BlobOutcome::Found(bytes, meta) => Ok(((*bytes).clone(), meta)),
            BlobOutcome::NotFound => Err(Error::ObjectNotFound(name.to_string())),
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let result = self.inner.delete(name).await;
        self.cache.invalidate(&name.to_string());
        result
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        self.inner.exists(name).await
    }

    async fn enumerate(&self) -> Result<Vec<String>> {
        self.inner.enumerate().await
    }
}
