//! Cross-modal matcher scenarios: direct matching with contextual
//! reweighting, relationship inference and semantic bridging.

mod common;

use std::sync::Arc;

use common::{basis_vector, vectors_with_similarity, TEST_DIM};
use redis_ai_gateway::service_islands::layer1_infrastructure::app_config::CrossModalConfig;
use redis_ai_gateway::service_islands::layer1_infrastructure::store_capability::memory::MemoryStore;
use redis_ai_gateway::service_islands::layer1_infrastructure::store_capability::Store;
use redis_ai_gateway::service_islands::layer3_communication::vector_store_island::{
    ContentType, EmbeddingDocument, VectorStoreAdapter,
};
use redis_ai_gateway::service_islands::layer5_business_logic::cross_modal_island::{
    CrossModalMatcher, MatchContext, RelationshipKind,
};

fn adapter() -> Arc<VectorStoreAdapter> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    Arc::new(VectorStoreAdapter::new(store, "embeddings", TEST_DIM))
}

fn doc(
    id: &str,
    vector: Vec<f32>,
    content_type: ContentType,
    tags: &[&str],
) -> EmbeddingDocument {
    EmbeddingDocument::new(
        id,
        vector,
        format!("content-{id}"),
        content_type,
        serde_json::json!({ "tags": tags }),
    )
}

#[tokio::test]
async fn test_direct_cross_modal_match() {
    let vector_store = adapter();
    let (source_vec, near_vec) = vectors_with_similarity(0.9);

    let source = doc("src-text", source_vec, ContentType::Text, &["rust"]);
    vector_store.store_embedding(&source).await.unwrap();
    vector_store
        .store_embedding(&doc("img-near", near_vec, ContentType::Image, &["rust"]))
        .await
        .unwrap();
    vector_store
        .store_embedding(&doc(
            "img-far",
            basis_vector(7),
            ContentType::Image,
            &["cooking"],
        ))
        .await
        .unwrap();

    let matcher = CrossModalMatcher::new(vector_store, CrossModalConfig::default());
    let matches = matcher
        .find_related(&source, &[ContentType::Image], &MatchContext::default())
        .await
        .unwrap();

    assert_eq!(matches.len(), 1, "only the near image clears the threshold");
    assert_eq!(matches[0].content_id, "content-img-near");
    assert_eq!(matches[0].content_type, ContentType::Image);
    assert_eq!(matches[0].relationship, RelationshipKind::Illustrates);
    assert!(!matches[0].bridged);
    assert!(matches[0].score > 0.8);
}

/// Context tags reweight scores; disjoint tags can push a match under
/// the relevance floor.
#[tokio::test]
async fn test_contextual_reweighting_drops_irrelevant() {
    let vector_store = adapter();
    let (source_vec, near_vec) = vectors_with_similarity(0.9);

    let source = doc("src", source_vec, ContentType::Text, &[]);
    vector_store.store_embedding(&source).await.unwrap();
    vector_store
        .store_embedding(&doc(
            "img",
            near_vec,
            ContentType::Image,
            &["unrelated", "tags"],
        ))
        .await
        .unwrap();

    let matcher = CrossModalMatcher::new(vector_store, CrossModalConfig::default());
    let context = MatchContext {
        tags: vec!["rust".to_string(), "parser".to_string()],
        source_path: None,
        timestamp_ms: None,
    };
    let matches = matcher
        .find_related(&source, &[ContentType::Image], &context)
        .await
        .unwrap();
    assert!(
        matches.is_empty(),
        "zero tag overlap puts relevance at 0, under the floor"
    );
}

/// Sparse direct results trigger bridging through the text modality:
/// source → text bridge → target, confidence `s1 × s2 × 0.8`.
#[tokio::test]
async fn test_semantic_bridging() {
    let vector_store = adapter();
    // Three vectors in one plane: the bridge at cosine 0.9 from the
    // source, the image another 0.9-rotation past the bridge, which
    // puts it at cosine 2·0.9²−1 ≈ 0.62 from the source — near the
    // bridge, too far from the source for a direct match.
    let (source_vec, bridge_vec) = vectors_with_similarity(0.9);
    let cos_theta = 0.9f32;
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
    let mut image_vec = vec![0.0; TEST_DIM];
    image_vec[0] = 2.0 * cos_theta * cos_theta - 1.0;
    image_vec[1] = 2.0 * sin_theta * cos_theta;

    let source = doc("src", source_vec, ContentType::Text, &[]);
    vector_store.store_embedding(&source).await.unwrap();
    vector_store
        .store_embedding(&doc("bridge", bridge_vec, ContentType::Text, &[]))
        .await
        .unwrap();
    vector_store
        .store_embedding(&doc("img", image_vec, ContentType::Image, &[]))
        .await
        .unwrap();

    let matcher = CrossModalMatcher::new(
        vector_store,
        CrossModalConfig {
            similarity_threshold: 0.85,
            max_matches_per_type: 5,
            enable_semantic_bridging: true,
            min_contextual_relevance: 0.3,
        },
    );
    let matches = matcher
        .find_related(&source, &[ContentType::Image], &MatchContext::default())
        .await
        .unwrap();

    let bridged: Vec<_> = matches.iter().filter(|m| m.bridged).collect();
    assert!(
        !bridged.is_empty(),
        "sparse direct results should produce bridged matches: {matches:?}"
    );
    let hit = bridged[0];
    assert_eq!(hit.content_id, "content-img");
    // Bridged confidence is s1 × s2 × 0.8 = 0.9 × 0.9 × 0.8
    assert!((hit.score - 0.648).abs() < 0.05);
}

/// Repeated lookups come from the result cache.
#[tokio::test]
async fn test_result_cache_reuse() {
    let vector_store = adapter();
    let (source_vec, near_vec) = vectors_with_similarity(0.9);
    let source = doc("src", source_vec, ContentType::Text, &[]);
    vector_store.store_embedding(&source).await.unwrap();
    vector_store
        .store_embedding(&doc("img", near_vec, ContentType::Image, &[]))
        .await
        .unwrap();

    let matcher = CrossModalMatcher::new(vector_store, CrossModalConfig::default());
    let first = matcher
        .find_related(&source, &[ContentType::Image], &MatchContext::default())
        .await
        .unwrap();
    let second = matcher
        .find_related(&source, &[ContentType::Image], &MatchContext::default())
        .await
        .unwrap();
    assert_eq!(first.len(), second.len());
    assert_eq!(matcher.statistics()["cached_result_sets"], 1);
}
