//! Whole-gateway smoke test: initialization over an in-process store,
//! an end-to-end routed request with cache write-back, health and
//! shutdown.

mod common;

use std::sync::Arc;

use common::{test_endpoint, ScriptedInvoker, StubEmbedder, TEST_DIM};
use redis_ai_gateway::service_islands::layer1_infrastructure::app_config::GatewayConfig;
use redis_ai_gateway::service_islands::layer1_infrastructure::store_capability::memory::{
    MemoryConnectionFactory, MemoryStore,
};
use redis_ai_gateway::service_islands::layer2_external_services::ModelInvoker;
use redis_ai_gateway::service_islands::layer5_business_logic::model_routing_island::types::RequestType;
use redis_ai_gateway::ServiceIslands;

async fn build() -> (ServiceIslands, Arc<ScriptedInvoker>) {
    common::init_tracing();
    let mut config = GatewayConfig::default();
    config.embedding_dimension = TEST_DIM;
    config.semantic_cache.warmup_queries = vec!["common greeting".to_string()];

    let store = MemoryStore::new();
    let factory = Arc::new(MemoryConnectionFactory::new(store));
    let embedder = Arc::new(StubEmbedder::new(TEST_DIM));
    let invoker = Arc::new(ScriptedInvoker::new());

    let invoker_dyn: Arc<dyn ModelInvoker> = Arc::clone(&invoker) as Arc<dyn ModelInvoker>;
    let islands = ServiceIslands::initialize(config, factory, embedder, invoker_dyn)
        .await
        .unwrap();
    (islands, invoker)
}

#[tokio::test]
async fn test_end_to_end_request_flow() {
    let (islands, invoker) = build().await;
    islands
        .registry
        .register(test_endpoint("m-main", RequestType::TextGeneration, 80, 0.9))
        .unwrap();

    let request = redis_ai_gateway::service_islands::layer5_business_logic::model_routing_island::types::AiRequest::new(
        "explain the service islands architecture",
        RequestType::TextGeneration,
    );
    let first = islands.router.process_request(&request).await.unwrap();
    assert!(!first.from_cache);
    assert!(first.content.contains("m-main"));

    let second = islands.router.process_request(&request).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(invoker.call_count(), 1);

    // Metrics landed for the endpoint
    islands.monitor.flush_all().await;
    assert!(islands
        .monitor
        .get_model_performance(
            "m-main",
            redis_ai_gateway::service_islands::layer4_observability::performance_island::timeseries::Window::FiveMinutes
        )
        .is_some());
}

#[tokio::test]
async fn test_health_and_statistics() {
    let (islands, _invoker) = build().await;
    islands
        .registry
        .register(test_endpoint("m-main", RequestType::TextGeneration, 80, 0.9))
        .unwrap();

    assert!(islands.health_check().await);

    islands.record_system_snapshot();
    let stats = islands.statistics();
    assert!(stats["data_plane"]["pool"]["max_connections"].as_u64().unwrap() > 0);
    assert!(stats["semantic_cache"]["entries"].is_number());
    assert!(stats["routing"]["routed"].is_number());
}

#[tokio::test]
async fn test_background_processing_and_shutdown() {
    let (islands, _invoker) = build().await;
    islands
        .registry
        .register(test_endpoint("m-main", RequestType::TextGeneration, 80, 0.9))
        .unwrap();

    islands.start_background_processing().await.unwrap();
    // Warmup seeded the configured query; an exact repeat hits
    let hit = islands
        .semantic_cache
        .get("common greeting", RequestType::TextGeneration, None, &[])
        .await;
    assert!(hit.is_some(), "warmup query should be resident");

    islands.shutdown().await;
    // The pool refuses new work after shutdown
    assert!(islands.data_plane.pool.acquire().await.is_err());
}
