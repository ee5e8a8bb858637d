//! Prefetch Cache
//!
//! Read-through cache over the store, bounded in bytes. Every access
//! feeds a per-key pattern (count, recency, average gap) and a sliding
//! co-occurrence window that discovers related keys. Hot keys trigger
//! background reads of their neighborhood; a refresh task rewarms the
//! hottest entries and decays popularity so it ages.

use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::service_islands::layer1_infrastructure::app_config::PrefetchConfig;
use crate::service_islands::layer1_infrastructure::store_capability::{Store, StoreOp, StoreReply};
use crate::service_islands::layer5_business_logic::shared::error::{
    GatewayError, GatewayResult,
};

/// Sliding window for temporal co-occurrence discovery
const CO_OCCURRENCE_WINDOW: Duration = Duration::from_secs(2);
const CO_OCCURRENCE_CAP: usize = 256;
/// Hottest entries considered per refresh pass
const REFRESH_TOP_N: usize = 20;
/// Fixed per-entry bookkeeping charged against the byte budget
const ENTRY_OVERHEAD: usize = 64;

struct CacheEntry {
    value: String,
    size: usize,
    created_at: Instant,
    last_access: Mutex<Instant>,
    last_refresh: Mutex<Instant>,
    access_count: AtomicU64,
}

/// Access history for one key; survives eviction of the entry so the
/// neighborhood keeps informing prefetch decisions.
struct AccessPattern {
    count: f64,
    last_access: Instant,
    avg_gap_ms: f64,
    related: HashSet<String>,
}

struct PrefetchShared {
    config: PrefetchConfig,
    entries: DashMap<String, Arc<CacheEntry>>,
    patterns: DashMap<String, AccessPattern>,
    recent: Mutex<VecDeque<(Instant, String)>>,
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    prefetching: DashSet<String>,
    /// Highest decayed access count seen across all patterns; the
    /// prefetch trigger measures each key against this high-water mark
    peak_count: Mutex<f64>,
    total_bytes: AtomicUsize,
    // Counters
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    prefetches: AtomicU64,
    evictions: AtomicU64,
    refreshes: AtomicU64,
}

/// Read-through cache with access-pattern-driven prefetching
pub struct PrefetchCache {
    shared: Arc<PrefetchShared>,
    refresh_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PrefetchCache {
    #[must_use]
    pub fn new(config: PrefetchConfig) -> Self {
        Self {
            shared: Arc::new(PrefetchShared {
                config,
                entries: DashMap::new(),
                patterns: DashMap::new(),
                recent: Mutex::new(VecDeque::new()),
                inflight: DashMap::new(),
                prefetching: DashSet::new(),
                peak_count: Mutex::new(0.0),
                total_bytes: AtomicUsize::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                fetches: AtomicU64::new(0),
                prefetches: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                refreshes: AtomicU64::new(0),
            }),
            refresh_task: Mutex::new(None),
        }
    }

    /// Read a key, serving from memory when present
    ///
    /// A miss fetches through the store, admits the value and returns
    /// it. Concurrent cold reads of the same key collapse into one
    /// store fetch.
    ///
    /// # Errors
    ///
    /// Propagates the store error from a fetch-through.
    pub async fn get(
        &self,
        store: &Arc<dyn Store>,
        key: &str,
    ) -> GatewayResult<Option<String>> {
        self.get_with_deadline(store, key, None).await
    }

    /// As [`get`](Self::get), with a bound on the fetch-through
    ///
    /// Expiry returns `Timeout` and releases the single-flight guard;
    /// a memory hit never waits on the deadline.
    ///
    /// # Errors
    ///
    /// `Timeout` when the deadline elapses mid-fetch, otherwise the
    /// store error from the fetch-through.
    pub async fn get_with_deadline(
        &self,
        store: &Arc<dyn Store>,
        key: &str,
        deadline: Option<Duration>,
    ) -> GatewayResult<Option<String>> {
        if !self.shared.config.enabled {
            return Self::bounded_fetch(store, key, deadline).await;
        }
        if let Some(entry) = self.shared.entries.get(key).map(|e| Arc::clone(&e)) {
            self.shared.hits.fetch_add(1, Ordering::Relaxed);
            entry.access_count.fetch_add(1, Ordering::Relaxed);
            *entry.last_access.lock() = Instant::now();
            self.record_access(store, key);
            return Ok(Some(entry.value.clone()));
        }

        // Single-flight: the first cold reader fetches, the rest wait
        let gate = self
            .shared
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;
        if let Some(entry) = self.shared.entries.get(key).map(|e| Arc::clone(&e)) {
            self.shared.hits.fetch_add(1, Ordering::Relaxed);
            entry.access_count.fetch_add(1, Ordering::Relaxed);
            *entry.last_access.lock() = Instant::now();
            self.record_access(store, key);
            return Ok(Some(entry.value.clone()));
        }

        self.shared.misses.fetch_add(1, Ordering::Relaxed);
        self.shared.fetches.fetch_add(1, Ordering::Relaxed);
        let fetched = match Self::bounded_fetch(store, key, deadline).await {
            Ok(value) => value,
            Err(e) => {
                drop(_guard);
                self.shared.inflight.remove(key);
                return Err(e);
            }
        };
        if let Some(value) = &fetched {
            self.admit(key, value.clone());
        }
        drop(_guard);
        self.shared.inflight.remove(key);
        self.record_access(store, key);
        Ok(fetched)
    }

    async fn bounded_fetch(
        store: &Arc<dyn Store>,
        key: &str,
        deadline: Option<Duration>,
    ) -> GatewayResult<Option<String>> {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, store.get(key))
                .await
                .map_err(|_| {
                    GatewayError::Timeout(format!("fetch-through for {key}"))
                })?,
            None => store.get(key).await,
        }
    }

    /// Read many keys: deduplicate, serve hits, batch the misses
    ///
    /// The result aligns with the input key order.
    ///
    /// # Errors
    ///
    /// Propagates the store error from the batched fetch.
    pub async fn mget(
        &self,
        store: &Arc<dyn Store>,
        keys: &[String],
    ) -> GatewayResult<Vec<Option<String>>> {
        if !self.shared.config.enabled {
            let ops = keys
                .iter()
                .map(|k| StoreOp::Get { key: k.clone() })
                .collect();
            let replies = store.pipeline(ops).await?;
            return Ok(replies
                .into_iter()
                .map(|r| match r {
                    StoreReply::Text(s) => Some(s),
                    _ => None,
                })
                .collect());
        }

        let mut unique: Vec<&String> = Vec::new();
        let mut seen = HashSet::new();
        for key in keys {
            if seen.insert(key.as_str()) {
                unique.push(key);
            }
        }

        let mut resolved: ahash::AHashMap<&str, Option<String>> = ahash::AHashMap::new();
        let mut missing: Vec<&String> = Vec::new();
        for key in &unique {
            match self.shared.entries.get(key.as_str()) {
                Some(entry) => {
                    self.shared.hits.fetch_add(1, Ordering::Relaxed);
                    entry.access_count.fetch_add(1, Ordering::Relaxed);
                    *entry.last_access.lock() = Instant::now();
                    resolved.insert(key.as_str(), Some(entry.value.clone()));
                }
                None => missing.push(key),
            }
        }

        if !missing.is_empty() {
            self.shared.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);
            let ops = missing
                .iter()
                .map(|k| StoreOp::Get { key: (*k).clone() })
                .collect();
            self.shared.fetches.fetch_add(1, Ordering::Relaxed);
            let replies = store.pipeline(ops).await?;
            for (key, reply) in missing.iter().zip(replies) {
                let value = match reply {
                    StoreReply::Text(s) => Some(s),
                    _ => None,
                };
                if let Some(v) = &value {
                    self.admit(key, v.clone());
                }
                resolved.insert(key.as_str(), value);
            }
        }

        for key in &unique {
            self.record_access(store, key);
        }
        Ok(keys
            .iter()
            .map(|k| resolved.get(k.as_str()).cloned().flatten())
            .collect())
    }

    /// Drop one key from memory
    pub fn invalidate(&self, key: &str) {
        if let Some((_, entry)) = self.shared.entries.remove(key) {
            self.shared
                .total_bytes
                .fetch_sub(entry.size, Ordering::Relaxed);
        }
    }

    /// Drop everything, patterns included
    pub fn clear(&self) {
        self.shared.entries.clear();
        self.shared.patterns.clear();
        self.shared.recent.lock().clear();
        *self.shared.peak_count.lock() = 0.0;
        self.shared.total_bytes.store(0, Ordering::Relaxed);
    }

    /// Admit a value, evicting least-useful entries to stay in budget
    fn admit(&self, key: &str, value: String) {
        Self::admit_shared(&self.shared, key, value);
    }

    fn admit_shared(shared: &Arc<PrefetchShared>, key: &str, value: String) {
        let size = key.len() + value.len() + ENTRY_OVERHEAD;
        if size > shared.config.max_cache_size {
            return;
        }
        while shared.total_bytes.load(Ordering::Relaxed) + size > shared.config.max_cache_size {
            if !Self::evict_least_useful(shared) {
                return;
            }
        }
        let now = Instant::now();
        let entry = Arc::new(CacheEntry {
            value,
            size,
            created_at: now,
            last_access: Mutex::new(now),
            last_refresh: Mutex::new(now),
            access_count: AtomicU64::new(1),
        });
        if let Some(previous) = shared.entries.insert(key.to_string(), entry) {
            shared
                .total_bytes
                .fetch_sub(previous.size, Ordering::Relaxed);
        }
        shared.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    /// Evict the entry with the lowest usefulness score:
    /// `norm(frequency) × recency − norm(size)`.
    fn evict_least_useful(shared: &Arc<PrefetchShared>) -> bool {
        let mut max_count = 1u64;
        let mut max_size = 1usize;
        for entry in shared.entries.iter() {
            max_count = max_count.max(entry.access_count.load(Ordering::Relaxed));
            max_size = max_size.max(entry.size);
        }

        let mut victim: Option<(String, f64)> = None;
        #[allow(clippy::cast_precision_loss)]
        for entry in shared.entries.iter() {
            let freq =
                entry.access_count.load(Ordering::Relaxed) as f64 / max_count as f64;
            let idle_secs = entry.last_access.lock().elapsed().as_secs_f64();
            let recency = 1.0 / (1.0 + idle_secs);
            let size_penalty = entry.size as f64 / max_size as f64;
            let usefulness = freq * recency - size_penalty;
            let replace = victim
                .as_ref()
                .is_none_or(|(_, best)| usefulness < *best);
            if replace {
                victim = Some((entry.key().clone(), usefulness));
            }
        }

        match victim {
            Some((key, score)) => {
                if let Some((_, entry)) = shared.entries.remove(&key) {
                    shared
                        .total_bytes
                        .fetch_sub(entry.size, Ordering::Relaxed);
                    shared.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key, score, "Evicted least-useful entry");
                }
                true
            }
            None => false,
        }
    }

    /// Update the key's pattern and co-occurrence neighborhood, and
    /// kick off related-key prefetch when the key runs hot.
    fn record_access(&self, store: &Arc<dyn Store>, key: &str) {
        let now = Instant::now();

        // Neighborhood: keys touched within the sliding window
        let neighbors: Vec<String> = {
            let mut recent = self.shared.recent.lock();
            while recent
                .front()
                .is_some_and(|(at, _)| now.duration_since(*at) > CO_OCCURRENCE_WINDOW)
                || recent.len() >= CO_OCCURRENCE_CAP
            {
                recent.pop_front();
            }
            let neighbors = recent
                .iter()
                .filter(|(_, k)| k != key)
                .map(|(_, k)| k.clone())
                .collect();
            recent.push_back((now, key.to_string()));
            neighbors
        };

        let should_prefetch = {
            let mut pattern =
                self.shared
                    .patterns
                    .entry(key.to_string())
                    .or_insert_with(|| AccessPattern {
                        count: 0.0,
                        last_access: now,
                        avg_gap_ms: 0.0,
                        related: HashSet::new(),
                    });
            let gap_ms = now.duration_since(pattern.last_access).as_millis() as f64;
            pattern.avg_gap_ms = if pattern.count == 0.0 {
                gap_ms
            } else {
                pattern.avg_gap_ms * 0.8 + gap_ms * 0.2
            };
            pattern.count += 1.0;
            pattern.last_access = now;
            for neighbor in &neighbors {
                pattern.related.insert(neighbor.clone());
            }
            // The trigger measures this key against the high-water mark
            // as it stood before this access; the mark advances only
            // after the comparison, so a key cannot clear the bar by
            // raising it itself.
            let peak_before = *self.shared.peak_count.lock();
            let hot = pattern.count >= 2.0
                && pattern.count >= self.shared.config.prefetch_threshold * peak_before
                && !pattern.related.is_empty();
            let mut peak = self.shared.peak_count.lock();
            if pattern.count > *peak {
                *peak = pattern.count;
            }
            hot
        };
        for neighbor in neighbors {
            if let Some(mut other) = self.shared.patterns.get_mut(&neighbor) {
                other.related.insert(key.to_string());
            }
        }

        if should_prefetch {
            self.schedule_prefetch(store, key);
        }
    }

    /// Background reads of the key's co-accessed neighborhood
    fn schedule_prefetch(&self, store: &Arc<dyn Store>, key: &str) {
        let targets: Vec<String> = match self.shared.patterns.get(key) {
            Some(pattern) => pattern
                .related
                .iter()
                .filter(|k| !self.shared.entries.contains_key(*k))
                .filter(|k| !self.shared.prefetching.contains(*k))
                .cloned()
                .collect(),
            None => return,
        };
        if targets.is_empty() {
            return;
        }
        for target in &targets {
            self.shared.prefetching.insert(target.clone());
        }
        let shared = Arc::clone(&self.shared);
        let store = Arc::clone(store);
        tokio::spawn(async move {
            for target in targets {
                if !shared.entries.contains_key(&target) {
                    match store.get(&target).await {
                        Ok(Some(value)) => {
                            Self::admit_shared(&shared, &target, value);
                            shared.prefetches.fetch_add(1, Ordering::Relaxed);
                            debug!(key = %target, "Prefetched related key");
                        }
                        Ok(None) => {}
                        Err(e) => {
                            debug!(key = %target, error = %e, "Prefetch read failed");
                        }
                    }
                }
                shared.prefetching.remove(&target);
            }
        });
    }

    /// Start the background refresh/decay loop
    pub fn start_background_refresh(&self, store: Arc<dyn Store>) {
        let mut guard = self.refresh_task.lock();
        if guard.is_some() || !self.shared.config.enabled {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let interval = Duration::from_millis(shared.config.background_refresh_interval_ms);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                Self::refresh_pass(&shared, &store, interval).await;
            }
        }));
    }

    /// Decay popularity, then rewarm the hottest stale entries
    async fn refresh_pass(
        shared: &Arc<PrefetchShared>,
        store: &Arc<dyn Store>,
        interval: Duration,
    ) {
        let decay = shared.config.popularity_decay_factor;
        let mut max_count = 1.0f64;
        for mut pattern in shared.patterns.iter_mut() {
            pattern.count *= decay;
            max_count = max_count.max(pattern.count);
        }
        // The high-water mark ages with the counts it was drawn from
        {
            let mut peak = shared.peak_count.lock();
            *peak *= decay;
        }

        // Hottest first; refresh those whose warmth has gone stale. Hot
        // entries get a shorter refresh TTL than lukewarm ones.
        let mut hottest: Vec<(String, f64)> = shared
            .entries
            .iter()
            .map(|entry| {
                let count = shared
                    .patterns
                    .get(entry.key())
                    .map_or(0.0, |p| p.count);
                (entry.key().clone(), count)
            })
            .collect();
        hottest.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hottest.truncate(REFRESH_TOP_N);

        for (key, count) in hottest {
            let norm = (count / max_count).clamp(0.0, 1.0);
            let ttl = interval.mul_f64(2.0 - norm);
            let stale = shared
                .entries
                .get(&key)
                .is_some_and(|entry| entry.last_refresh.lock().elapsed() >= ttl);
            if !stale {
                continue;
            }
            match store.get(&key).await {
                Ok(Some(value)) => {
                    if let Some(entry) = shared.entries.get(&key).map(|e| Arc::clone(&e)) {
                        let new_size = key.len() + value.len() + ENTRY_OVERHEAD;
                        let refreshed = Arc::new(CacheEntry {
                            value,
                            size: new_size,
                            created_at: entry.created_at,
                            last_access: Mutex::new(*entry.last_access.lock()),
                            last_refresh: Mutex::new(Instant::now()),
                            access_count: AtomicU64::new(
                                entry.access_count.load(Ordering::Relaxed),
                            ),
                        });
                        shared.entries.insert(key.clone(), refreshed);
                        shared.total_bytes.fetch_add(new_size, Ordering::Relaxed);
                        shared.total_bytes.fetch_sub(entry.size, Ordering::Relaxed);
                        shared.refreshes.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(None) => {
                    if let Some((_, entry)) = shared.entries.remove(&key) {
                        shared.total_bytes.fetch_sub(entry.size, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    warn!(key, error = %e, "Background refresh read failed");
                }
            }
        }
    }

    /// Stop the refresh loop
    pub fn stop(&self) {
        if let Some(handle) = self.refresh_task.lock().take() {
            handle.abort();
        }
    }

    /// Cache hit rate over its lifetime
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.shared.hits.load(Ordering::Relaxed);
        let misses = self.shared.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Number of resident entries
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.shared.entries.len()
    }

    /// Resident bytes
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.shared.total_bytes.load(Ordering::Relaxed)
    }

    /// Cache statistics
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "entries": self.entry_count(),
            "total_bytes": self.total_bytes(),
            "max_bytes": self.shared.config.max_cache_size,
            "hits": self.shared.hits.load(Ordering::Relaxed),
            "misses": self.shared.misses.load(Ordering::Relaxed),
            "hit_rate": self.hit_rate(),
            "fetches": self.shared.fetches.load(Ordering::Relaxed),
            "prefetches": self.shared.prefetches.load(Ordering::Relaxed),
            "evictions": self.shared.evictions.load(Ordering::Relaxed),
            "refreshes": self.shared.refreshes.load(Ordering::Relaxed),
            "tracked_patterns": self.shared.patterns.len(),
            "peak_access_count": *self.shared.peak_count.lock(),
        })
    }
}

impl Drop for PrefetchCache {
    fn drop(&mut self) {
        self.stop();
    }
}
