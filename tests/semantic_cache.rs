//! Semantic cache scenarios: exact and similar hits, TTL expiry,
//! invalidation, the entry/vector pairing guarantee, warmup, the
//! quality gate and capacity eviction.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{vectors_with_similarity, StubEmbedder, TEST_DIM};
use redis_ai_gateway::service_islands::layer1_infrastructure::app_config::{
    EvictionPolicy, SemanticCacheConfig,
};
use redis_ai_gateway::service_islands::layer1_infrastructure::store_capability::memory::MemoryStore;
use redis_ai_gateway::service_islands::layer1_infrastructure::store_capability::Store;
use redis_ai_gateway::service_islands::layer2_external_services::Embedder;
use redis_ai_gateway::service_islands::layer5_business_logic::model_routing_island::types::RequestType;
use redis_ai_gateway::service_islands::layer5_business_logic::semantic_cache_island::{
    CacheEntryMetadata, SemanticCache,
};

fn config() -> SemanticCacheConfig {
    SemanticCacheConfig {
        similarity_threshold: 0.85,
        max_cache_size: 100,
        default_ttl_ms: 60_000,
        enable_eviction: true,
        eviction_policy: EvictionPolicy::Hybrid,
        compression_enabled: true,
        quality_threshold: 0.7,
        warmup_queries: Vec::new(),
        enable_normalization: true,
        cache_by_model: false,
    }
}

fn metadata(quality: f64) -> CacheEntryMetadata {
    CacheEntryMetadata {
        model: "gpt-fast".to_string(),
        response_time_ms: 420.0,
        prompt_tokens: 12,
        completion_tokens: 30,
        cost: 0.0021,
        quality,
        tags: Vec::new(),
    }
}

async fn build_cache(
    config: SemanticCacheConfig,
) -> (Arc<SemanticCache>, MemoryStore, Arc<StubEmbedder>) {
    let memory = MemoryStore::new();
    let embedder = Arc::new(StubEmbedder::new(TEST_DIM));
    let store: Arc<dyn Store> = Arc::new(memory.clone());
    let embedder_dyn: Arc<dyn Embedder> = Arc::clone(&embedder) as Arc<dyn Embedder>;
    let cache = SemanticCache::new(store, embedder_dyn, config)
        .await
        .unwrap();
    (Arc::new(cache), memory, embedder)
}

/// An exact repeat hits with similarity 1.0 and returns the stored
/// response, decompressed when the payload was large.
#[tokio::test]
async fn test_exact_hit_round_trip() {
    let (cache, _memory, _embedder) = build_cache(config()).await;
    let response = "The capital of France is Paris. ".repeat(100);

    assert!(
        cache
            .set(
                "What is the capital of France?",
                RequestType::QuestionAnswering,
                &response,
                metadata(0.9),
                &[],
            )
            .await
    );

    let hit = cache
        .get(
            "What is the capital of France?",
            RequestType::QuestionAnswering,
            None,
            &[],
        )
        .await
        .expect("exact repeat should hit");
    assert!(hit.is_exact);
    assert!(hit.similarity >= 0.99);
    assert_eq!(hit.response, response);
    assert_eq!(hit.model, "gpt-fast");
    assert!((hit.time_saved_ms - 420.0).abs() < f64::EPSILON);
}

/// Normalization makes trivially-different phrasings exact matches.
#[tokio::test]
async fn test_normalized_variants_share_identity() {
    let (cache, _memory, _embedder) = build_cache(config()).await;
    cache
        .set(
            "What is the capital of France?",
            RequestType::QuestionAnswering,
            "Paris.",
            metadata(0.9),
            &[],
        )
        .await;

    let hit = cache
        .get(
            "  what is THE capital of france  ",
            RequestType::QuestionAnswering,
            None,
            &[],
        )
        .await
        .expect("normalized variant should hit exactly");
    assert!(hit.is_exact);
    assert_eq!(hit.response, "Paris.");
}

/// A paraphrase at cosine 0.9 crosses the 0.85 threshold and hits
/// non-exactly.
#[tokio::test]
async fn test_similar_hit_above_threshold() {
    let (cache, _memory, embedder) = build_cache(config()).await;
    let (v1, v2) = vectors_with_similarity(0.9);
    // Register the normalized forms the cache embeds
    embedder.register("capital france", v1);
    embedder.register("capital city france", v2);

    cache
        .set(
            "What is the capital of France?",
            RequestType::QuestionAnswering,
            "Paris.",
            metadata(0.9),
            &[],
        )
        .await;

    let hit = cache
        .get(
            "What is the capital city of France?",
            RequestType::QuestionAnswering,
            None,
            &[],
        )
        .await
        .expect("paraphrase should hit through KNN");
    assert!(!hit.is_exact);
    assert!((hit.similarity - 0.9).abs() < 0.02);
    assert_eq!(hit.response, "Paris.");
}

/// A paraphrase below the threshold misses.
#[tokio::test]
async fn test_dissimilar_query_misses() {
    let (cache, _memory, embedder) = build_cache(config()).await;
    let (v1, v2) = vectors_with_similarity(0.5);
    embedder.register("capital france", v1);
    embedder.register("best pizza rome", v2);

    cache
        .set(
            "What is the capital of France?",
            RequestType::QuestionAnswering,
            "Paris.",
            metadata(0.9),
            &[],
        )
        .await;

    assert!(cache
        .get(
            "Where is the best pizza in Rome?",
            RequestType::QuestionAnswering,
            None,
            &[],
        )
        .await
        .is_none());
}

/// An expired entry misses and both the entry and
/// its vector record are gone afterwards.
#[tokio::test]
async fn test_ttl_expiry_evicts_pair() {
    let mut cfg = config();
    cfg.default_ttl_ms = 100;
    let (cache, memory, _embedder) = build_cache(cfg).await;

    cache
        .set(
            "ephemeral question",
            RequestType::TextGeneration,
            "ephemeral answer",
            metadata(0.9),
            &[],
        )
        .await;
    // Pairing holds while the entry is live
    assert_eq!(memory.keys_by_pattern("semantic_cache:entry:*").await.unwrap().len(), 1);
    assert_eq!(
        memory
            .keys_by_pattern("semantic_cache:embedding:*")
            .await
            .unwrap()
            .len(),
        1
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(cache
        .get("ephemeral question", RequestType::TextGeneration, None, &[])
        .await
        .is_none());

    assert!(memory.keys_by_pattern("semantic_cache:entry:*").await.unwrap().is_empty());
    assert!(memory
        .keys_by_pattern("semantic_cache:embedding:*")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(cache.entry_count(), 0);
}

/// After pattern invalidation, matching queries miss
/// until a new set.
#[tokio::test]
async fn test_pattern_invalidation() {
    let (cache, _memory, _embedder) = build_cache(config()).await;
    cache
        .set(
            "tell me about redis",
            RequestType::TextGeneration,
            "redis is a data store",
            metadata(0.9),
            &[],
        )
        .await;
    cache
        .set(
            "tell me about postgres",
            RequestType::TextGeneration,
            "postgres is a database",
            metadata(0.9),
            &[],
        )
        .await;

    let removed = cache.invalidate(Some("redis")).await.unwrap();
    assert_eq!(removed, 1);

    assert!(cache
        .get("tell me about redis", RequestType::TextGeneration, None, &[])
        .await
        .is_none());
    assert!(cache
        .get("tell me about postgres", RequestType::TextGeneration, None, &[])
        .await
        .is_some());

    // A fresh set makes it visible again
    cache
        .set(
            "tell me about redis",
            RequestType::TextGeneration,
            "redis, again",
            metadata(0.9),
            &[],
        )
        .await;
    assert!(cache
        .get("tell me about redis", RequestType::TextGeneration, None, &[])
        .await
        .is_some());
}

/// Invalidation without a pattern clears everything.
#[tokio::test]
async fn test_clear_all() {
    let (cache, memory, _embedder) = build_cache(config()).await;
    for i in 0..3 {
        cache
            .set(
                &format!("question {i}"),
                RequestType::TextGeneration,
                "answer",
                metadata(0.9),
                &[],
            )
            .await;
    }
    let removed = cache.invalidate(None).await.unwrap();
    assert_eq!(removed, 3);
    assert_eq!(cache.entry_count(), 0);
    assert!(memory.keys_by_pattern("semantic_cache:entry:*").await.unwrap().is_empty());
}

/// Low-quality responses are dropped silently.
#[tokio::test]
async fn test_quality_gate() {
    let (cache, _memory, _embedder) = build_cache(config()).await;
    assert!(
        !cache
            .set(
                "weak answer",
                RequestType::TextGeneration,
                "meh",
                metadata(0.3),
                &[],
            )
            .await
    );
    assert!(cache
        .get("weak answer", RequestType::TextGeneration, None, &[])
        .await
        .is_none());
    assert_eq!(cache.entry_count(), 0);
}

/// Warmed-up queries short-circuit on exact repeats.
#[tokio::test]
async fn test_warmup_short_circuits() {
    let (cache, _memory, _embedder) = build_cache(config()).await;
    let queries = vec!["common question one".to_string(), "common question two".to_string()];
    let seeded = cache.warmup(&queries).await.unwrap();
    assert_eq!(seeded, 2);

    let hit = cache
        .get("common question one", RequestType::TextGeneration, None, &[])
        .await
        .expect("warmed query should hit exactly");
    assert!(hit.is_exact);
    assert_eq!(hit.model, "warmup");

    // Re-warming the same queries seeds nothing new
    assert_eq!(cache.warmup(&queries).await.unwrap(), 0);
}

/// At capacity every admission evicts exactly one entry;
/// the count never exceeds the budget.
#[tokio::test]
async fn test_capacity_eviction_keeps_count() {
    let mut cfg = config();
    cfg.max_cache_size = 3;
    let (cache, _memory, _embedder) = build_cache(cfg).await;

    for i in 0..5 {
        cache
            .set(
                &format!("unique question number {i}"),
                RequestType::TextGeneration,
                "answer",
                metadata(0.9),
                &[],
            )
            .await;
    }
    assert_eq!(cache.entry_count(), 3);
    let stats = cache.statistics();
    assert_eq!(stats["evictions"].as_u64().unwrap(), 2);
}

/// Optimize expires dead entries and reports its work.
#[tokio::test]
async fn test_optimize_reports() {
    let mut cfg = config();
    cfg.default_ttl_ms = 50;
    let (cache, _memory, _embedder) = build_cache(cfg).await;

    for i in 0..3 {
        cache
            .set(
                &format!("short lived {i}"),
                RequestType::TextGeneration,
                &"padding ".repeat(300),
                metadata(0.9),
                &[],
            )
            .await;
    }
    tokio::time::sleep(Duration::from_millis(80)).await;

    let report = cache.optimize().await.unwrap();
    assert_eq!(report.evicted, 3);
    assert_eq!(cache.entry_count(), 0);
}
