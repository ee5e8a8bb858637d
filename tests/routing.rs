//! Routing engine scenarios: breaker-driven failover and recovery,
//! load balancing, candidate exhaustion, alternative packing and the
//! semantic-cache request path.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{test_endpoint, ScriptedInvoker, StubEmbedder, TEST_DIM};
use redis_ai_gateway::service_islands::layer1_infrastructure::app_config::{
    BreakerConfig, MonitorConfig, RouterConfig, SemanticCacheConfig,
};
use redis_ai_gateway::service_islands::layer1_infrastructure::store_capability::memory::MemoryStore;
use redis_ai_gateway::service_islands::layer1_infrastructure::store_capability::Store;
use redis_ai_gateway::service_islands::layer2_external_services::model_provider_island::circuit_breaker::{
    CircuitBreaker, CircuitState,
};
use redis_ai_gateway::service_islands::layer2_external_services::ModelInvoker;
use redis_ai_gateway::service_islands::layer4_observability::performance_island::PerformanceMonitorIsland;
use redis_ai_gateway::service_islands::layer5_business_logic::model_routing_island::model_registry::ModelRegistry;
use redis_ai_gateway::service_islands::layer5_business_logic::model_routing_island::request_analyzer::RequestAnalyzer;
use redis_ai_gateway::service_islands::layer5_business_logic::model_routing_island::types::{
    AiRequest, RequestType,
};
use redis_ai_gateway::service_islands::layer5_business_logic::model_routing_island::RoutingEngine;
use redis_ai_gateway::service_islands::layer5_business_logic::semantic_cache_island::SemanticCache;

struct Harness {
    router: Arc<RoutingEngine>,
    registry: Arc<ModelRegistry>,
    invoker: Arc<ScriptedInvoker>,
    breakers: Arc<CircuitBreaker>,
}

async fn build_harness(
    breaker_timeout_ms: u64,
    with_cache: bool,
) -> Harness {
    let registry = Arc::new(ModelRegistry::new());
    let analyzer = Arc::new(RequestAnalyzer::new());
    let monitor = PerformanceMonitorIsland::new(MonitorConfig::default());
    let breakers = Arc::new(CircuitBreaker::new(BreakerConfig {
        failure_threshold: 5,
        open_timeout_ms: breaker_timeout_ms,
    }));
    let invoker = Arc::new(ScriptedInvoker::new());

    let cache = if with_cache {
        let memory = MemoryStore::new();
        let store: Arc<dyn Store> = Arc::new(memory);
        let embedder = Arc::new(StubEmbedder::new(TEST_DIM));
        Some(Arc::new(
            SemanticCache::new(store, embedder, SemanticCacheConfig::default())
                .await
                .unwrap(),
        ))
    } else {
        None
    };

    let invoker_dyn: Arc<dyn ModelInvoker> = Arc::clone(&invoker) as Arc<dyn ModelInvoker>;
    let router = Arc::new(RoutingEngine::new(
        RouterConfig::default(),
        Arc::clone(&registry),
        analyzer,
        monitor,
        Arc::clone(&breakers),
        invoker_dyn,
        cache,
    ));
    Harness {
        router,
        registry,
        invoker,
        breakers,
    }
}

/// Five forced failures open the fast model's breaker and routing
/// falls to the slow model; after the quiet period one success brings
/// the fast model back.
#[tokio::test]
async fn test_breaker_failover_and_recovery() {
    let harness = build_harness(200, false).await;
    harness
        .registry
        .register(test_endpoint("m-fast", RequestType::TextGeneration, 90, 0.95))
        .unwrap();
    harness
        .registry
        .register(test_endpoint("m-slow", RequestType::TextGeneration, 70, 0.8))
        .unwrap();
    harness.invoker.fail_endpoint("m-fast");

    let request = AiRequest::new("summarize the incident report", RequestType::TextGeneration);
    let decision = harness.router.route(&request).unwrap();
    assert_eq!(decision.selected.id, "m-fast", "fast model scores higher while closed");
    // Five forced failures of the fast model; each attempt fails over
    // to the slow alternative and still succeeds for the caller
    for _ in 0..5 {
        let response = harness.router.execute_request(&request, &decision).await.unwrap();
        assert_eq!(response.model_id, "m-slow");
    }
    assert_eq!(harness.breakers.state("m-fast"), CircuitState::Open);

    // With the breaker open, routing selects the slow model outright
    let decision = harness.router.route(&request).unwrap();
    assert_eq!(decision.selected.id, "m-slow");

    // Quiet period passes, the provider recovers, one success closes it
    tokio::time::sleep(Duration::from_millis(250)).await;
    harness.invoker.recover_endpoint("m-fast");
    assert_eq!(harness.breakers.state("m-fast"), CircuitState::HalfOpen);

    let decision = harness.router.route(&request).unwrap();
    assert_eq!(decision.selected.id, "m-fast");
    let response = harness.router.execute_request(&request, &decision).await.unwrap();
    assert_eq!(response.model_id, "m-fast");
    assert_eq!(harness.breakers.state("m-fast"), CircuitState::Closed);
}

/// Identical models share traffic nearly evenly over 100 rounds.
#[tokio::test]
async fn test_load_balancing_distribution() {
    let harness = build_harness(60_000, false).await;
    harness
        .registry
        .register(test_endpoint("m-one", RequestType::TextGeneration, 50, 0.9))
        .unwrap();
    harness
        .registry
        .register(test_endpoint("m-two", RequestType::TextGeneration, 50, 0.9))
        .unwrap();

    let request = AiRequest::new("balance me", RequestType::TextGeneration);
    let mut one = 0i32;
    let mut two = 0i32;
    for _ in 0..100 {
        let decision = harness.router.route(&request).unwrap();
        match decision.selected.id.as_str() {
            "m-one" => one += 1,
            "m-two" => two += 1,
            other => panic!("unexpected selection {other}"),
        }
        harness.router.execute_request(&request, &decision).await.unwrap();
    }
    assert!(
        (one - two).abs() <= 10,
        "selection skew too large: m-one={one} m-two={two}"
    );
}

/// Routing a type nobody serves yields NoCandidates.
#[tokio::test]
async fn test_no_candidates() {
    let harness = build_harness(60_000, false).await;
    harness
        .registry
        .register(test_endpoint("m-text", RequestType::TextGeneration, 50, 0.9))
        .unwrap();

    let request = AiRequest::new("transcribe this recording", RequestType::AudioTranscription);
    let err = harness.router.route(&request).unwrap_err();
    assert_eq!(err.tag(), "no_candidates");
}

/// All alternatives failing surfaces RoutingExhausted with the last
/// underlying cause attached.
#[tokio::test]
async fn test_routing_exhausted_carries_cause() {
    let harness = build_harness(60_000, false).await;
    harness
        .registry
        .register(test_endpoint("m-a", RequestType::TextGeneration, 50, 0.9))
        .unwrap();
    harness
        .registry
        .register(test_endpoint("m-b", RequestType::TextGeneration, 50, 0.85))
        .unwrap();
    harness.invoker.fail_endpoint("m-a");
    harness.invoker.fail_endpoint("m-b");

    let request = AiRequest::new("doomed request", RequestType::TextGeneration);
    let decision = harness.router.route(&request).unwrap();
    let err = harness.router.execute_request(&request, &decision).await.unwrap_err();
    assert_eq!(err.tag(), "routing_exhausted");
    let cause = std::error::Error::source(&err).expect("cause attached");
    assert!(cause.to_string().contains("502"));
}

/// A decision packs at most three alternatives, all distinct from the
/// selected model and active.
#[tokio::test]
async fn test_alternatives_are_bounded_and_distinct() {
    let harness = build_harness(60_000, false).await;
    for i in 0..6 {
        harness
            .registry
            .register(test_endpoint(
                &format!("m-{i}"),
                RequestType::TextGeneration,
                50,
                0.7 + f64::from(i) * 0.04,
            ))
            .unwrap();
    }

    let request = AiRequest::new("pick wisely", RequestType::TextGeneration);
    let decision = harness.router.route(&request).unwrap();
    assert!(decision.alternatives.len() <= 3);
    let mut ids: Vec<&str> = decision
        .alternatives
        .iter()
        .map(|e| e.id.as_str())
        .collect();
    ids.push(decision.selected.id.as_str());
    let unique: std::collections::HashSet<&str> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len(), "alternatives must be distinct");
    assert!(decision.alternatives.iter().all(|e| e.active));
    assert!((0.0..=1.0).contains(&decision.confidence));
}

/// The full request path writes to and then serves from the semantic
/// cache.
#[tokio::test]
async fn test_process_request_uses_cache() {
    let harness = build_harness(60_000, true).await;
    harness
        .registry
        .register(test_endpoint("m-main", RequestType::TextGeneration, 50, 0.9))
        .unwrap();

    let request = AiRequest::new("explain write-through caching", RequestType::TextGeneration);
    let first = harness.router.process_request(&request).await.unwrap();
    assert!(!first.from_cache);
    assert_eq!(harness.invoker.call_count(), 1);

    let second = harness.router.process_request(&request).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.content, first.content);
    assert_eq!(second.cache_similarity, Some(1.0));
    assert_eq!(harness.invoker.call_count(), 1, "cache hit must not call the provider");
}

/// Concurrent identical requests
/// collapse into one provider call.
#[tokio::test]
async fn test_concurrent_requests_single_provider_call() {
    let harness = build_harness(60_000, true).await;
    harness
        .registry
        .register(test_endpoint("m-main", RequestType::TextGeneration, 50, 0.9))
        .unwrap();
    harness.invoker.set_delay(Some(Duration::from_millis(50)));

    let request = AiRequest::new("deduplicate me", RequestType::TextGeneration);
    let mut handles = Vec::new();
    for _ in 0..5 {
        let router = Arc::clone(&harness.router);
        let request = request.clone();
        handles.push(tokio::spawn(async move {
            router.process_request(&request).await.unwrap()
        }));
    }
    let mut contents = Vec::new();
    for handle in handles {
        contents.push(handle.await.unwrap().content);
    }
    assert_eq!(harness.invoker.call_count(), 1, "single-flight must hold");
    assert!(contents.windows(2).all(|w| w[0] == w[1]));
}
