//! Query optimizer end-to-end: planning, execution over the store,
//! threshold filtering and the consult-and-write plan cache.

mod common;

use std::sync::Arc;

use common::{basis_vector, vectors_with_similarity, TEST_DIM};
use redis_ai_gateway::service_islands::layer1_infrastructure::app_config::OptimizerConfig;
use redis_ai_gateway::service_islands::layer1_infrastructure::data_plane_island::query_optimizer::{
    QueryOptimizer, VectorSearchQuery,
};
use redis_ai_gateway::service_islands::layer1_infrastructure::store_capability::memory::MemoryStore;
use redis_ai_gateway::service_islands::layer1_infrastructure::store_capability::Store;
use redis_ai_gateway::service_islands::layer3_communication::vector_store_island::{
    ContentType, EmbeddingDocument, VectorStoreAdapter,
};

async fn seeded_store() -> (MemoryStore, Arc<dyn Store>, String) {
    let memory = MemoryStore::new();
    let store: Arc<dyn Store> = Arc::new(memory.clone());
    let adapter = VectorStoreAdapter::new(Arc::clone(&store), "embeddings", TEST_DIM);

    let (close, closer) = vectors_with_similarity(0.95);
    adapter
        .store_embedding(&EmbeddingDocument::new(
            "a",
            close,
            "content-a",
            ContentType::Text,
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    adapter
        .store_embedding(&EmbeddingDocument::new(
            "b",
            closer,
            "content-b",
            ContentType::Text,
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    adapter
        .store_embedding(&EmbeddingDocument::new(
            "c",
            basis_vector(5),
            "content-c",
            ContentType::Text,
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    (memory, store, "embeddings_embedding_idx".to_string())
}

fn query(index: &str, limit: usize, threshold: Option<f64>) -> VectorSearchQuery {
    VectorSearchQuery {
        index: index.to_string(),
        vector: basis_vector(0),
        limit,
        ef: None,
        filter: None,
        threshold,
        include_metadata: true,
        include_vectors: false,
    }
}

#[tokio::test]
async fn test_execute_orders_by_similarity() {
    let (_memory, store, index) = seeded_store().await;
    let optimizer = QueryOptimizer::new(OptimizerConfig::default());

    let plan = optimizer
        .optimize_vector_search(query(&index, 3, None))
        .unwrap();
    let result = optimizer.execute_optimized_query(&store, &plan).await.unwrap();

    assert_eq!(result.results.len(), 3);
    // "a" is the query vector itself, "b" at cosine 0.95, "c" orthogonal
    assert!(result.results[0].id.ends_with(":a"));
    assert!(result.results[1].id.ends_with(":b"));
    assert!(result.results[0].score > result.results[1].score);
    assert!(result.results[1].score > result.results[2].score);
}

#[tokio::test]
async fn test_threshold_drops_low_scores() {
    let (_memory, store, index) = seeded_store().await;
    let optimizer = QueryOptimizer::new(OptimizerConfig::default());

    let plan = optimizer
        .optimize_vector_search(query(&index, 3, Some(0.9)))
        .unwrap();
    let result = optimizer.execute_optimized_query(&store, &plan).await.unwrap();

    assert_eq!(result.results.len(), 2, "orthogonal hit must be filtered");
    assert!(result.results.iter().all(|hit| hit.score >= 0.9));
}

/// A full-cache plan consults the cache: the second execution answers
/// without touching the store.
#[tokio::test]
async fn test_plan_cache_consulted() {
    let (memory, store, index) = seeded_store().await;
    let optimizer = QueryOptimizer::new(OptimizerConfig::default());

    let plan = optimizer
        .optimize_vector_search(query(&index, 2, None))
        .unwrap();
    let first = optimizer.execute_optimized_query(&store, &plan).await.unwrap();
    let searches_after_first = memory.search_calls();

    let second = optimizer.execute_optimized_query(&store, &plan).await.unwrap();
    assert_eq!(memory.search_calls(), searches_after_first, "cache hit skips the store");
    assert_eq!(first.results.len(), second.results.len());
    assert_eq!(optimizer.statistics()["plan_cache_hits"], 1);
}

/// Disabled result caching always executes.
#[tokio::test]
async fn test_cache_bypass_when_disabled() {
    let (memory, store, index) = seeded_store().await;
    let optimizer = QueryOptimizer::new(OptimizerConfig {
        enable_result_caching: false,
        ..OptimizerConfig::default()
    });

    let plan = optimizer
        .optimize_vector_search(query(&index, 2, None))
        .unwrap();
    optimizer.execute_optimized_query(&store, &plan).await.unwrap();
    optimizer.execute_optimized_query(&store, &plan).await.unwrap();
    assert_eq!(memory.search_calls(), 2);
}

/// An over-budget query is refused and the refusal is counted.
#[tokio::test]
async fn test_complexity_refusal_counts_metrics() {
    let optimizer = QueryOptimizer::new(OptimizerConfig {
        max_complexity: 5.0,
        ..OptimizerConfig::default()
    });
    let wide = VectorSearchQuery {
        index: "idx".to_string(),
        vector: vec![0.1; 1_100],
        limit: 10,
        ef: None,
        filter: None,
        threshold: None,
        include_metadata: false,
        include_vectors: false,
    };
    let err = optimizer.optimize_vector_search(wide).unwrap_err();
    assert_eq!(err.tag(), "complexity_exceeded");
    let stats = optimizer.statistics();
    assert_eq!(stats["planned"], 1);
    assert_eq!(stats["rejected"], 1);
}
