//! Semantic Cache Island
//!
//! Embedding-keyed response cache. A query is normalized, hashed and
//! embedded; exact repeats short-circuit through a hash index, close
//! paraphrases hit through KNN over the cache's own vector index.
//! Every entry is paired with a vector record under the same id and
//! both are written in one pipelined call, so readers never observe
//! one without the other. The cache never throws on its read path: any
//! non-fatal error degrades to a miss.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::service_islands::layer1_infrastructure::app_config::SemanticCacheConfig;
use crate::service_islands::layer1_infrastructure::store_capability::{
    Store, StoreOp, StoreReply,
};
use crate::service_islands::layer2_external_services::embedding_island::Embedder;
use crate::service_islands::layer3_communication::vector_store_island::{
    ContentType, EmbeddingDocument, SimilarityOptions, VectorStoreAdapter,
};
use crate::service_islands::layer5_business_logic::model_routing_island::types::RequestType;
use crate::service_islands::layer5_business_logic::shared::compression;
use crate::service_islands::layer5_business_logic::shared::error::GatewayResult;

pub mod eviction;
pub mod normalization;

use eviction::EvictionCandidate;
use normalization::QueryNormalizer;

const PREFIX: &str = "semantic_cache";
/// Optimize timer cadence when eviction is enabled
const OPTIMIZE_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Similarity above which a hit counts as exact
const EXACT_SIMILARITY: f64 = 0.99;
/// KNN width for similarity lookup
const LOOKUP_LIMIT: usize = 5;

/// Metadata stored with each cached response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheEntryMetadata {
    pub model: String,
    pub response_time_ms: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
    /// Heuristic usefulness in [0, 1]; gates admission and reads
    pub quality: f64,
    pub tags: Vec<String>,
}

/// Persisted cache entry document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryDocument {
    pub id: String,
    pub query_hash: String,
    pub original_query: String,
    pub response: String,
    /// Response is gzip+base64 when set
    pub compressed: bool,
    pub metadata: CacheEntryMetadata,
    #[serde(default)]
    pub context_keys: Vec<String>,
    pub created_at: i64,
    pub last_accessed: i64,
    pub access_count: u64,
    pub ttl_ms: u64,
}

impl CacheEntryDocument {
    fn expired(&self, now_ms: i64) -> bool {
        #[allow(clippy::cast_possible_wrap)]
        let ttl = self.ttl_ms as i64;
        ttl > 0 && now_ms >= self.created_at + ttl
    }
}

/// A semantic cache hit
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub entry_id: String,
    pub response: String,
    pub similarity: f64,
    pub is_exact: bool,
    pub model: String,
    /// Provider latency the hit avoided
    pub time_saved_ms: f64,
    pub cost_saved: f64,
}

/// Report of one optimize pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizeReport {
    pub evicted: u64,
    pub bytes_reclaimed: u64,
    pub duration_ms: u64,
}

/// Semantic response cache
pub struct SemanticCache {
    store: Arc<dyn Store>,
    vector_store: Arc<VectorStoreAdapter>,
    embedder: Arc<dyn Embedder>,
    config: SemanticCacheConfig,
    normalizer: QueryNormalizer,
    entry_count: AtomicI64,
    optimize_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    // Counters
    hits: AtomicU64,
    exact_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    dropped_low_quality: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
    compression_saved: AtomicU64,
}

impl SemanticCache {
    /// Build the cache over a store session and an embedder
    ///
    /// # Errors
    ///
    /// `Store` when the initial entry scan or index creation fails.
    pub async fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        config: SemanticCacheConfig,
    ) -> GatewayResult<Self> {
        let vector_store = Arc::new(VectorStoreAdapter::new(
            Arc::clone(&store),
            PREFIX,
            embedder.dimension(),
        ));
        vector_store.ensure_index().await?;
        let existing = store
            .keys_by_pattern(&format!("{PREFIX}:entry:*"))
            .await?
            .len();
        info!(entries = existing, "💾 Semantic cache initialized");
        let normalizer =
            QueryNormalizer::new(config.enable_normalization, config.cache_by_model);
        Ok(Self {
            store,
            vector_store,
            embedder,
            config,
            normalizer,
            #[allow(clippy::cast_possible_wrap)]
            entry_count: AtomicI64::new(existing as i64),
            optimize_task: Mutex::new(None),
            hits: AtomicU64::new(0),
            exact_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            dropped_low_quality: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            compression_saved: AtomicU64::new(0),
        })
    }

    fn entry_key(id: &str) -> String {
        format!("{PREFIX}:entry:{id}")
    }

    fn hash_key(hash: &str) -> String {
        format!("{PREFIX}:hash:{hash}")
    }

    /// The cache key and its hash for a query
    #[must_use]
    pub fn cache_identity(
        &self,
        query: &str,
        request_type: RequestType,
        model: Option<&str>,
        context_keys: &[String],
    ) -> (String, String) {
        let normalized = self.normalizer.normalize(query, request_type);
        let key = self.normalizer.cache_key(&normalized, model, context_keys);
        let hash = QueryNormalizer::hash_key(&key);
        (key, hash)
    }

    /// Look up a response for a query
    ///
    /// Exact repeats resolve through the hash index; otherwise the
    /// query is embedded and matched by KNN under the similarity
    /// threshold. TTL-expired and low-quality entries are rejected.
    /// All internal errors degrade to a miss.
    pub async fn get(
        &self,
        query: &str,
        request_type: RequestType,
        model: Option<&str>,
        context_keys: &[String],
    ) -> Option<SemanticHit> {
        let (key, hash) = self.cache_identity(query, request_type, model, context_keys);
        let now_ms = chrono::Utc::now().timestamp_millis();

        // Exact short-circuit
        match self.store.get(&Self::hash_key(&hash)).await {
            Ok(Some(id)) => {
                if let Some(hit) = self.try_hit(&id, 1.0, now_ms).await {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    self.exact_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(hit);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Hash index read failed, degrading to miss path");
            }
        }

        // Similarity path
        let normalized = self.normalizer.normalize(query, request_type);
        let vector = match self.embedder.embed(&normalized, None).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "Embedding failed, semantic lookup degraded to miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        let matches = match self
            .vector_store
            .search_similar(
                &vector,
                &SimilarityOptions {
                    limit: LOOKUP_LIMIT,
                    threshold: self.config.similarity_threshold,
                    include_metadata: false,
                    include_vectors: false,
                },
            )
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "KNN lookup failed, degrading to miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        for similar in matches {
            if let Some(hit) = self.try_hit(&similar.content_id, similar.similarity, now_ms).await
            {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if hit.is_exact {
                    self.exact_hits.fetch_add(1, Ordering::Relaxed);
                }
                debug!(key = %key, similarity = hit.similarity, "Semantic cache hit");
                return Some(hit);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Load, validate and account one candidate entry
    async fn try_hit(&self, id: &str, similarity: f64, now_ms: i64) -> Option<SemanticHit> {
        let entry_key = Self::entry_key(id);
        let raw = self.store.json_get(&entry_key, "$").await.ok()??;
        let entry: CacheEntryDocument = serde_json::from_value(raw).ok()?;

        if entry.expired(now_ms) {
            self.expired.fetch_add(1, Ordering::Relaxed);
            self.delete_entry(&entry).await;
            return None;
        }
        if entry.metadata.quality < self.config.quality_threshold {
            return None;
        }

        // Post-hit accounting; failures here never block the hit
        if let Err(e) = self
            .store
            .json_num_incr_by(&entry_key, "$.accessCount", 1.0)
            .await
        {
            debug!(error = %e, "Access count bump failed");
        }
        let _ = self
            .store
            .json_set(&entry_key, "$.lastAccessed", &serde_json::json!(now_ms))
            .await;

        let response = if entry.compressed {
            match compression::decompress_payload(&entry.response) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, entry = %entry.id, "Corrupt compressed payload");
                    return None;
                }
            }
        } else {
            entry.response
        };

        Some(SemanticHit {
            entry_id: entry.id,
            response,
            similarity,
            is_exact: similarity > EXACT_SIMILARITY,
            model: entry.metadata.model,
            time_saved_ms: entry.metadata.response_time_ms,
            cost_saved: entry.metadata.cost,
        })
    }

    /// Store a response under its query
    ///
    /// Low-quality responses are dropped silently. At capacity one
    /// entry is evicted first. The entry and its vector record go to
    /// the store in one pipelined call. Returns whether the response
    /// was admitted; internal failures log and admit nothing.
    pub async fn set(
        &self,
        query: &str,
        request_type: RequestType,
        response: &str,
        metadata: CacheEntryMetadata,
        context_keys: &[String],
    ) -> bool {
        if metadata.quality < self.config.quality_threshold {
            self.dropped_low_quality.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self
            .set_inner(query, request_type, response, metadata, context_keys)
            .await
        {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(error = %e, "Semantic cache set failed");
                false
            }
        }
    }

    async fn set_inner(
        &self,
        query: &str,
        request_type: RequestType,
        response: &str,
        metadata: CacheEntryMetadata,
        context_keys: &[String],
    ) -> GatewayResult<bool> {
        let (key, hash) =
            self.cache_identity(query, request_type, Some(&metadata.model), context_keys);
        let id = hash.clone();
        let is_replacement = self
            .store
            .get(&Self::hash_key(&hash))
            .await?
            .is_some();

        #[allow(clippy::cast_possible_wrap)]
        if !is_replacement
            && self.entry_count.load(Ordering::SeqCst)
                >= self.config.max_cache_size as i64
        {
            self.evict(1).await?;
        }

        let normalized = self.normalizer.normalize(query, request_type);
        let vector = self.embedder.embed(&normalized, None).await?;

        let (stored_response, compressed) =
            if self.config.compression_enabled && compression::should_compress(response) {
                let (encoded, stats) = compression::compress_payload(response)?;
                self.compression_saved
                    .fetch_add(stats.bytes_saved() as u64, Ordering::Relaxed);
                (encoded, true)
            } else {
                (response.to_string(), false)
            };

        let now_ms = chrono::Utc::now().timestamp_millis();
        let entry = CacheEntryDocument {
            id: id.clone(),
            query_hash: hash.clone(),
            original_query: query.to_string(),
            response: stored_response,
            compressed,
            metadata,
            context_keys: context_keys.to_vec(),
            created_at: now_ms,
            last_accessed: now_ms,
            access_count: 0,
            ttl_ms: self.config.default_ttl_ms,
        };
        let embedding = EmbeddingDocument::new(
            id.clone(),
            vector,
            id.clone(),
            ContentType::Text,
            serde_json::json!({ "queryHash": hash, "cacheKey": key }),
        );

        // Entry, vector record and hash index land in one round trip;
        // a reader never sees the entry without its vector record.
        self.vector_store.ensure_index().await?;
        let replies = self
            .store
            .pipeline(vec![
                StoreOp::JsonSet {
                    key: Self::entry_key(&id),
                    path: "$".to_string(),
                    value: serde_json::to_value(&entry)?,
                },
                StoreOp::JsonSet {
                    key: self.vector_store.embedding_key(&id),
                    path: "$".to_string(),
                    value: serde_json::to_value(&embedding)?,
                },
                StoreOp::Set {
                    key: Self::hash_key(&hash),
                    value: id.clone(),
                    ttl: None,
                },
            ])
            .await?;
        if replies.iter().any(StoreReply::is_error) {
            warn!(entry = %id, "Pipelined cache write reported an error");
            return Ok(false);
        }

        if !is_replacement {
            self.entry_count.fetch_add(1, Ordering::SeqCst);
        }
        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Remove an entry, its vector record and its hash index key
    async fn delete_entry(&self, entry: &CacheEntryDocument) {
        let keys = vec![
            Self::entry_key(&entry.id),
            self.vector_store.embedding_key(&entry.id),
            Self::hash_key(&entry.query_hash),
        ];
        match self.store.del(&keys).await {
            Ok(_) => {
                self.entry_count.fetch_sub(1, Ordering::SeqCst);
            }
            Err(e) => warn!(error = %e, entry = %entry.id, "Entry delete failed"),
        }
    }

    /// Invalidate entries whose original query contains the pattern;
    /// a missing pattern clears the whole cache.
    ///
    /// # Errors
    ///
    /// `Store` when the scan fails.
    pub async fn invalidate(&self, pattern: Option<&str>) -> GatewayResult<u64> {
        let entries = self.load_all_entries().await?;
        let mut removed = 0u64;
        for entry in entries {
            let matched = match pattern {
                None => true,
                Some(needle) => entry.original_query.contains(needle),
            };
            if matched {
                self.delete_entry(&entry).await;
                removed += 1;
            }
        }
        info!(removed, pattern = pattern.unwrap_or("<all>"), "🧹 Semantic cache invalidated");
        Ok(removed)
    }

    /// Pre-seed the cache so exact repeats of known queries hit
    ///
    /// # Errors
    ///
    /// `Store` when the existence probe fails.
    pub async fn warmup(&self, queries: &[String]) -> GatewayResult<u64> {
        let mut seeded = 0u64;
        for query in queries {
            let (_, hash) =
                self.cache_identity(query, RequestType::TextGeneration, None, &[]);
            if self.store.get(&Self::hash_key(&hash)).await?.is_some() {
                continue;
            }
            let placeholder = CacheEntryMetadata {
                model: "warmup".to_string(),
                quality: self.config.quality_threshold.max(0.9),
                tags: vec!["warmup".to_string()],
                ..CacheEntryMetadata::default()
            };
            if self
                .set(query, RequestType::TextGeneration, "", placeholder, &[])
                .await
            {
                seeded += 1;
            }
        }
        if seeded > 0 {
            info!(seeded, "🔥 Semantic cache warmed up");
        }
        Ok(seeded)
    }

    /// Expire, evict back under budget, compress oversized bodies
    ///
    /// # Errors
    ///
    /// `Store` when the entry scan fails.
    pub async fn optimize(&self) -> GatewayResult<OptimizeReport> {
        let started = Instant::now();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut report = OptimizeReport::default();

        let entries = self.load_all_entries().await?;
        let mut live = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.expired(now_ms) {
                report.bytes_reclaimed += self.entry_footprint(&entry).await;
                self.expired.fetch_add(1, Ordering::Relaxed);
                self.delete_entry(&entry).await;
                report.evicted += 1;
            } else {
                live.push(entry);
            }
        }

        if live.len() > self.config.max_cache_size {
            let excess = live.len() - self.config.max_cache_size;
            let candidates = live
                .iter()
                .map(|entry| EvictionCandidate {
                    id: entry.id.clone(),
                    created_at_ms: entry.created_at,
                    last_accessed_ms: entry.last_accessed,
                    access_count: entry.access_count,
                    quality: entry.metadata.quality,
                })
                .collect();
            let ranked = eviction::rank(self.config.eviction_policy, candidates, now_ms);
            let doomed: std::collections::HashSet<&str> = ranked
                .iter()
                .take(excess)
                .map(|c| c.id.as_str())
                .collect();
            for entry in live
                .iter()
                .filter(|entry| doomed.contains(entry.id.as_str()))
            {
                report.bytes_reclaimed += self.entry_footprint(entry).await;
                self.delete_entry(entry).await;
                self.evictions.fetch_add(1, Ordering::Relaxed);
                report.evicted += 1;
            }
            live.retain(|entry| !doomed.contains(entry.id.as_str()));
        }

        if self.config.compression_enabled {
            for entry in &live {
                if !entry.compressed && compression::should_compress(&entry.response) {
                    if let Ok((encoded, stats)) = compression::compress_payload(&entry.response)
                    {
                        let entry_key = Self::entry_key(&entry.id);
                        let rewrites = self
                            .store
                            .pipeline(vec![
                                StoreOp::JsonSet {
                                    key: entry_key.clone(),
                                    path: "$.response".to_string(),
                                    value: serde_json::json!(encoded),
                                },
                                StoreOp::JsonSet {
                                    key: entry_key,
                                    path: "$.compressed".to_string(),
                                    value: serde_json::json!(true),
                                },
                            ])
                            .await;
                        if rewrites.is_ok() {
                            report.bytes_reclaimed += stats.bytes_saved() as u64;
                            self.compression_saved
                                .fetch_add(stats.bytes_saved() as u64, Ordering::Relaxed);
                        }
                    }
                }
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        {
            report.duration_ms = started.elapsed().as_millis() as u64;
        }
        debug!(
            evicted = report.evicted,
            bytes = report.bytes_reclaimed,
            ms = report.duration_ms,
            "Optimize pass complete"
        );
        Ok(report)
    }

    async fn entry_footprint(&self, entry: &CacheEntryDocument) -> u64 {
        self.store
            .memory_usage(&Self::entry_key(&entry.id))
            .await
            .unwrap_or(0)
    }

    /// Evict `n` entries under the configured policy
    async fn evict(&self, n: usize) -> GatewayResult<u64> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let entries = self.load_all_entries().await?;
        let candidates = entries
            .iter()
            .map(|entry| EvictionCandidate {
                id: entry.id.clone(),
                created_at_ms: entry.created_at,
                last_accessed_ms: entry.last_accessed,
                access_count: entry.access_count,
                quality: entry.metadata.quality,
            })
            .collect();
        let ranked = eviction::rank(self.config.eviction_policy, candidates, now_ms);
        let mut removed = 0u64;
        for victim in ranked.iter().take(n) {
            if let Some(entry) = entries.iter().find(|e| e.id == victim.id) {
                self.delete_entry(entry).await;
                self.evictions.fetch_add(1, Ordering::Relaxed);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn load_all_entries(&self) -> GatewayResult<Vec<CacheEntryDocument>> {
        let keys = self
            .store
            .keys_by_pattern(&format!("{PREFIX}:entry:*"))
            .await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = self.store.json_get(&key, "$").await? {
                match serde_json::from_value(raw) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => debug!(key, error = %e, "Skipping undecodable entry"),
                }
            }
        }
        Ok(entries)
    }

    /// Start the periodic optimize timer (eviction-enabled caches only)
    pub fn start_background_optimize(self: &Arc<Self>) {
        if !self.config.enable_eviction {
            return;
        }
        let mut guard = self.optimize_task.lock();
        if guard.is_some() {
            return;
        }
        let cache = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(OPTIMIZE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = cache.optimize().await {
                    warn!(error = %e, "Scheduled optimize failed");
                }
            }
        }));
    }

    /// Stop the optimize timer
    pub fn stop(&self) {
        if let Some(handle) = self.optimize_task.lock().take() {
            handle.abort();
        }
    }

    /// Resident entry count
    #[must_use]
    pub fn entry_count(&self) -> i64 {
        self.entry_count.load(Ordering::SeqCst)
    }

    /// Hit rate over the cache lifetime
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Cache statistics
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "island": "semantic_cache",
            "entries": self.entry_count(),
            "max_entries": self.config.max_cache_size,
            "hits": self.hits.load(Ordering::Relaxed),
            "exact_hits": self.exact_hits.load(Ordering::Relaxed),
            "misses": self.misses.load(Ordering::Relaxed),
            "hit_rate": self.hit_rate(),
            "sets": self.sets.load(Ordering::Relaxed),
            "dropped_low_quality": self.dropped_low_quality.load(Ordering::Relaxed),
            "evictions": self.evictions.load(Ordering::Relaxed),
            "expired": self.expired.load(Ordering::Relaxed),
            "compression_saved_bytes": self.compression_saved.load(Ordering::Relaxed),
        })
    }

    /// Health: the backing store must answer
    pub async fn health_check(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}

impl Drop for SemanticCache {
    fn drop(&mut self) {
        if let Some(handle) = self.optimize_task.lock().take() {
            handle.abort();
        }
    }
}
