//! Two-tier weighted TTL cache (§4.4): singleflight loading, MaxAge/MaxStale
//! separation with background refresh, weight-based eviction, and negative
//! caching. [`Cache`] is the generic engine; [`manifest`] and [`blob`] wrap
//! it around [`gitpages_storage::ManifestStore`]/[`gitpages_storage::BlobStore`]
//! with the specific policies the two tiers need.

pub mod blob;
pub mod manifest;

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use gitpages_config::CacheTierConfig;
use tokio::sync::{Mutex as AsyncMutex, Notify};

#[derive(Debug, Default)]
pub struct CacheCounters {
    pub hits_count: AtomicU64,
    pub hits_bytes: AtomicU64,
    pub misses_count: AtomicU64,
    pub misses_bytes: AtomicU64,
    pub evictions_count: AtomicU64,
    pub evictions_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheCountersSnapshot {
    pub hits_count: u64,
    pub hits_bytes: u64,
    pub misses_count: u64,
    pub misses_bytes: u64,
    pub evictions_count: u64,
    pub evictions_bytes: u64,
}

impl CacheCounters {
    fn snapshot(&self) -> CacheCountersSnapshot {
        CacheCountersSnapshot {
            hits_count: self.hits_count.load(Ordering::Relaxed),
            hits_bytes: self.hits_bytes.load(Ordering::Relaxed),
            misses_count: self.misses_count.load(Ordering::Relaxed),
            misses_bytes: self.misses_bytes.load(Ordering::Relaxed),
            evictions_count: self.evictions_count.load(Ordering::Relaxed),
            evictions_bytes: self.evictions_bytes.load(Ordering::Relaxed),
        }
    }
}

struct Entry<V> {
    value: V,
    weight: u64,
    loaded_at: Instant,
}

struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Least-recently-touched first; reinserted at the back on every hit.
    lru: VecDeque<K>,
    total_weight: u64,
    refreshing: HashSet<K>,
}

/// A weighted, TTL-bounded, singleflight-loading cache. Keys map to values
/// whose "weight" (byte size, or 1 for a negative/miss entry) is summed and
/// kept under `max_size` via FIFO-by-least-recent-touch eviction.
pub struct Cache<K, V> {
    config: CacheTierConfig,
    state: StdMutex<State<K, V>>,
    loading: AsyncMutex<HashMap<K, Arc<Notify>>>,
    counters: CacheCounters,
}

impl<K, V> Cache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheTierConfig) -> Self {
        Cache {
            config,
            state: StdMutex::new(State {
                entries: HashMap::new(),
                lru: VecDeque::new(),
                total_weight: 0,
                refreshing: HashSet::new(),
            }),
            loading: AsyncMutex::new(HashMap::new()),
            counters: CacheCounters::default(),
        }
    }

    pub fn counters(&self) -> CacheCountersSnapshot {
        self.counters.snapshot()
    }

    /// Evicts `key` outright, used by `BypassCache`.
    pub fn invalidate(&self, key: &K) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.remove(key) {
            state.total_weight = state.total_weight.saturating_sub(entry.weight);
            state.lru.retain(|k| k != key);
        }
    }

    /// Fetches `key`, loading via `load` on miss/stale/bypass. `load` is
    /// handed the previous value (if any) so it can issue a conditional
    /// reload (e.g. `If-None-Match`) on a background refresh.
    ///
    /// Takes `self: &Arc<Self>` because a stale hit dispatches a detached
    /// background refresh task that needs to own a handle back into the
    /// cache to install its result.
    pub async fn get_or_load<W, L, Fut>(
        self: &Arc<Self>,
        key: K,
        bypass: bool,
        weigh: W,
        load: L,
    ) -> V
    where
        W: Fn(&V) -> u64 + Send + Sync + Clone + 'static,
        L: Fn(Option<V>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = V> + Send + 'static,
    {
        if bypass {
            self.invalidate(&key);
        }

        loop {
            let now = Instant::now();
            let existing = {
                let mut state = self.state.lock().unwrap();
                state.entries.get(&key).map(|e| (e.value.clone(), e.loaded_at))
            };

            if let Some((value, loaded_at)) = existing {
                let age = now.duration_since(loaded_at);
                if age < self.config.max_age {
                    self.touch(&key);
                    self.counters.hits_count.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .hits_bytes
                        .fetch_add(weigh(&value), Ordering::Relaxed);
                    return value;
                }
                if age < self.config.max_age + self.config.max_stale {
                    self.touch(&key);
                    self.counters.hits_count.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .hits_bytes
                        .fetch_add(weigh(&value), Ordering::Relaxed);
                    self.dispatch_background_refresh(key.clone(), value.clone(), weigh, load);
                    return value;
                }
                // Past MaxAge+MaxStale: evict and fall through to a
                // synchronous reload.
                self.invalidate(&key);
            }

            // Singleflight: only one caller per key actually loads.
            let notify = {
                let mut loading = self.loading.lock().await;
                if let Some(notify) = loading.get(&key) {
                    Some(notify.clone())
                } else {
                    loading.insert(key.clone(), Arc::new(Notify::new()));
                    None
                }
            };

            if let Some(notify) = notify {
                notify.notified().await;
                continue;
            }

            let previous = {
                let state = self.state.lock().unwrap();
                state.entries.get(&key).map(|e| e.value.clone())
            };
            let value = load(previous).await;
            self.store(key.clone(), value.clone(), &weigh);
            self.counters.misses_count.fetch_add(1, Ordering::Relaxed);
            self.counters
                .misses_bytes
                .fetch_add(weigh(&value), Ordering::Relaxed);

            let mut loading = self.loading.lock().await;
            if let Some(notify) = loading.remove(&key) {
                notify.notify_waiters();
            }

            return value;
        }
    }

    fn touch(&self, key: &K) {
        let mut state = self.state.lock().unwrap();
        state.lru.retain(|k| k != key);
        state.lru.push_back(key.clone());
    }

    fn store<W>(&self, key: K, value: V, weigh: &W)
    where
        W: Fn(&V) -> u64,
    {
        let weight = weigh(&value);
        let mut state = self.state.lock().unwrap();
        if let Some(old) = state.entries.remove(&key) {
            state.total_weight = state.total_weight.saturating_sub(old.weight);
            state.lru.retain(|k| k != &key);
        }
        state.entries.insert(
            key.clone(),
            Entry {
                value,
                weight,
                loaded_at: Instant::now(),
            },
        );
        state.lru.push_back(key);
        state.total_weight += weight;

        while state.total_weight > self.config.max_size {
            let Some(evict_key) = state.lru.pop_front() else {
                break;
            };
            if let Some(evicted) = state.entries.remove(&evict_key) {
                state.total_weight = state.total_weight.saturating_sub(evicted.weight);
                self.counters.evictions_count.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .evictions_bytes
                    .fetch_add(evicted.weight, Ordering::Relaxed);
            }
        }
    }

    fn dispatch_background_refresh<W, L, Fut>(
        self: &Arc<Self>,
        key: K,
        previous: V,
        weigh: W,
        load: L,
    ) where
        W: Fn(&V) -> u64 + Send + Sync + Clone + 'static,
        L: Fn(Option<V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = V> + Send + 'static,
    {
        let already_refreshing = {
            let mut state = self.state.lock().unwrap();
            !state.refreshing.insert(key.clone())
        };
        if already_refreshing {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let refreshed = load(Some(previous)).await;
            this.store(key.clone(), refreshed, &weigh);
            this.state.lock().unwrap().refreshing.remove(&key);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn tier(max_size: u64, max_age_ms: u64, max_stale_ms: u64) -> CacheTierConfig {
        CacheTierConfig {
            max_size,
            max_age: Duration::from_millis(max_age_ms),
            max_stale: Duration::from_millis(max_stale_ms),
        }
    }

    #[tokio::test]
    async fn fresh_hit_does_not_reload() {
        let cache: Arc<Cache<String, u64>> = Arc::new(Cache::new(tier(1024, 60_000, 60_000)));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let load = move |_: Option<u64>| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                42
            }
        };

        let v1 = cache.get_or_load("k".to_string(), false, |_| 1, load.clone()).await;
        let v2 = cache.get_or_load("k".to_string(), false, |_| 1, load).await;
        assert_eq!(v1, 42);
        assert_eq!(v2, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bypass_forces_reload() {
        let cache: Arc<Cache<String, u32>> = Arc::new(Cache::new(tier(1024, 60_000, 60_000)));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let load = move |_: Option<u32>| {
            let c = c.clone();
            async move { c.fetch_add(1, Ordering::SeqCst) }
        };

        cache.get_or_load("k".to_string(), false, |_| 1, load.clone()).await;
        cache.get_or_load("k".to_string(), true, |_| 1, load).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_and_reloaded() {
        let cache: Arc<Cache<String, u32>> = Arc::new(Cache::new(tier(1024, 10, 0)));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let load = move |_: Option<u32>| {
            let c = c.clone();
            async move { c.fetch_add(1, Ordering::SeqCst) }
        };

        cache.get_or_load("k".to_string(), false, |_| 1, load.clone()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.get_or_load("k".to_string(), false, |_| 1, load).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn weighted_eviction_keeps_total_under_max_size() {
        let cache: Arc<Cache<u32, Vec<u8>>> = Arc::new(Cache::new(tier(10, 60_000, 0)));
        for i in 0..5u32 {
            cache
                .get_or_load(i, false, |v| v.len() as u64, move |_| async move { vec![0u8; 4] })
                .await;
        }
        let snapshot = cache.counters();
        assert!(snapshot.evictions_count > 0);
    }

    #[tokio::test]
    async fn concurrent_gets_singleflight_to_one_load() {
        let cache = Arc::new(Cache::<String, u32>::new(tier(1024, 60_000, 60_000)));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load("k".to_string(), false, |_| 1, move |_| {
                        let calls = calls.clone();
                        async move {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            calls.fetch_add(1, Ordering::SeqCst)
                        }
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
