//! Service Islands Architecture Registry
//! Central registry for all service islands
//!
//! This module provides the main entry point for the Service Islands
//! Architecture, managing initialization and health checking of all
//! islands across all layers. Initialization runs bottom-up: the data
//! plane first, then external services, communication adapters,
//! observability, and finally the business logic islands.

pub mod layer1_infrastructure;
pub mod layer2_external_services;
pub mod layer3_communication;
pub mod layer4_observability;
pub mod layer5_business_logic;

use std::sync::Arc;
use tracing::{debug, info, warn};

use layer1_infrastructure::app_config::GatewayConfig;
use layer1_infrastructure::data_plane_island::DataPlaneIsland;
use layer1_infrastructure::store_capability::{ConnectionFactory, Store};
use layer2_external_services::embedding_island::Embedder;
use layer2_external_services::model_provider_island::circuit_breaker::CircuitBreaker;
use layer2_external_services::model_provider_island::{HttpProviderClient, ModelInvoker};
use layer3_communication::vector_store_island::VectorStoreAdapter;
use layer4_observability::performance_island::recommendations::ProcessSnapshot;
use layer4_observability::performance_island::PerformanceMonitorIsland;
use layer5_business_logic::cross_modal_island::CrossModalMatcher;
use layer5_business_logic::model_routing_island::model_registry::ModelRegistry;
use layer5_business_logic::model_routing_island::request_analyzer::RequestAnalyzer;
use layer5_business_logic::model_routing_island::RoutingEngine;
use layer5_business_logic::semantic_cache_island::SemanticCache;

/// Main Service Islands Registry
///
/// Holds references to all service islands and provides unified
/// initialization, health checking and background-task lifecycle.
pub struct ServiceIslands {
    pub config: GatewayConfig,

    // Layer 1: Infrastructure Islands
    pub data_plane: Arc<DataPlaneIsland>,

    // Layer 2: External Services Islands
    pub breakers: Arc<CircuitBreaker>,

    // Layer 3: Communication Islands
    pub vector_store: Arc<VectorStoreAdapter>,

    // Layer 4: Observability Islands
    pub monitor: Arc<PerformanceMonitorIsland>,

    // Layer 5: Business Logic Islands
    pub registry: Arc<ModelRegistry>,
    pub analyzer: Arc<RequestAnalyzer>,
    pub semantic_cache: Arc<SemanticCache>,
    pub router: Arc<RoutingEngine>,
    pub cross_modal: Arc<CrossModalMatcher>,
}

impl ServiceIslands {
    /// Initialize all Service Islands over the given collaborators
    ///
    /// # Errors
    ///
    /// Returns error if configuration validation, the first store
    /// session, or semantic-cache initialization fails.
    pub async fn initialize(
        config: GatewayConfig,
        factory: Arc<dyn ConnectionFactory>,
        embedder: Arc<dyn Embedder>,
        invoker: Arc<dyn ModelInvoker>,
    ) -> Result<Self, anyhow::Error> {
        info!("🏝️ Initializing Service Islands Architecture...");
        config.validate()?;

        // Layer 1: Infrastructure (foundation layer)
        info!("🏗️ Initializing Layer 1: Infrastructure Islands...");
        let data_plane = Arc::new(DataPlaneIsland::new(&config, factory)?);
        let session = data_plane.pool.acquire().await?;
        let store: Arc<dyn Store> = Arc::clone(session.store());
        drop(session);

        // Layer 2: External Services
        info!("🌐 Initializing Layer 2: External Services Islands...");
        let breakers = Arc::new(CircuitBreaker::new(config.breaker.clone()));

        // Layer 3: Communication
        info!("📡 Initializing Layer 3: Communication Islands...");
        let vector_store = Arc::new(VectorStoreAdapter::new(
            Arc::clone(&store),
            config.embedding_prefix.clone(),
            config.embedding_dimension,
        ));

        // Layer 4: Observability
        info!("🔍 Initializing Layer 4: Observability Islands...");
        let monitor = PerformanceMonitorIsland::new(config.monitor.clone());
        monitor.attach_store(Arc::clone(&store));

        // Layer 5: Business Logic
        info!("📊 Initializing Layer 5: Business Logic Islands...");
        let registry = Arc::new(ModelRegistry::new());
        let analyzer = Arc::new(RequestAnalyzer::new());
        let semantic_cache = Arc::new(
            SemanticCache::new(
                Arc::clone(&store),
                Arc::clone(&embedder),
                config.semantic_cache.clone(),
            )
            .await?,
        );
        let router = Arc::new(RoutingEngine::new(
            config.router.clone(),
            Arc::clone(&registry),
            Arc::clone(&analyzer),
            Arc::clone(&monitor),
            Arc::clone(&breakers),
            invoker,
            Some(Arc::clone(&semantic_cache)),
        ));
        let cross_modal = Arc::new(CrossModalMatcher::new(
            Arc::clone(&vector_store),
            config.cross_modal.clone(),
        ));

        info!("✅ Service Islands Architecture initialized!");
        Ok(Self {
            config,
            data_plane,
            breakers,
            vector_store,
            monitor,
            registry,
            analyzer,
            semantic_cache,
            router,
            cross_modal,
        })
    }

    /// Initialize with the production HTTP provider client
    ///
    /// # Errors
    ///
    /// As [`ServiceIslands::initialize`], plus HTTP client build errors.
    pub async fn initialize_with_http(
        config: GatewayConfig,
        factory: Arc<dyn ConnectionFactory>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, anyhow::Error> {
        let invoker: Arc<dyn ModelInvoker> = Arc::new(HttpProviderClient::new()?);
        Self::initialize(config, factory, embedder, invoker).await
    }

    /// Start all background processing: pool maintenance, prefetch
    /// refresh, metric flushing, cache optimization and warmup.
    ///
    /// # Errors
    ///
    /// Returns error when a background session cannot be established.
    pub async fn start_background_processing(&self) -> Result<(), anyhow::Error> {
        info!("🔄 Starting Service Islands background processing...");
        self.data_plane.start_background_processing().await?;
        self.monitor.start_background_processing();
        self.semantic_cache.start_background_optimize();
        if !self.config.semantic_cache.warmup_queries.is_empty() {
            let seeded = self
                .semantic_cache
                .warmup(&self.config.semantic_cache.warmup_queries)
                .await?;
            debug!(seeded, "Warmup queries seeded");
        }
        info!("✅ Background processing started");
        Ok(())
    }

    /// Perform health check on all Service Islands
    ///
    /// Returns true if all islands are healthy, false otherwise.
    pub async fn health_check(&self) -> bool {
        debug!("🔍 Performing Service Islands health check...");

        let data_plane_healthy = self.data_plane.health_check().await;
        let breakers_healthy = self.breakers.health_check();
        let monitor_healthy = self.monitor.health_check();
        let cache_healthy = self.semantic_cache.health_check().await;
        let router_healthy = self.router.health_check();

        let all_healthy = data_plane_healthy
            && breakers_healthy
            && monitor_healthy
            && cache_healthy
            && router_healthy;

        if all_healthy {
            info!("✅ All Service Islands are healthy!");
        } else {
            warn!("❌ Some Service Islands are unhealthy!");
            warn!(
                "   Data Plane Island: {}",
                if data_plane_healthy { "✅" } else { "❌" }
            );
            warn!(
                "   Circuit Breakers: {}",
                if breakers_healthy { "✅" } else { "❌" }
            );
            warn!(
                "   Performance Monitor: {}",
                if monitor_healthy { "✅" } else { "❌" }
            );
            warn!(
                "   Semantic Cache: {}",
                if cache_healthy { "✅" } else { "❌" }
            );
            warn!(
                "   Routing Engine: {}",
                if router_healthy { "✅" } else { "❌" }
            );
        }

        all_healthy
    }

    /// Capture a process snapshot from the islands' own collectors and
    /// hand it to the performance monitor.
    pub fn record_system_snapshot(&self) {
        let snapshot = ProcessSnapshot {
            heap_bytes: 0,
            rss_bytes: 0,
            external_bytes: 0,
            pool_utilization: self.data_plane.pool.utilization(),
            batching_efficiency: self.data_plane.batcher.batching_efficiency(),
            cache_hit_rate: self.semantic_cache.hit_rate(),
            query_latency_p95_ms: 0.0,
            query_latency_p99_ms: 0.0,
            gc_stats: None,
        };
        self.monitor.record_snapshot(snapshot);
    }

    /// Aggregated statistics across all islands
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "data_plane": self.data_plane.statistics(),
            "semantic_cache": self.semantic_cache.statistics(),
            "routing": self.router.statistics(),
            "registry": self.registry.statistics(),
            "monitor": self.monitor.statistics(),
            "cross_modal": self.cross_modal.statistics(),
        })
    }

    /// Graceful shutdown of all Service Islands
    ///
    /// Stops background tasks and drains resources in reverse
    /// dependency order.
    pub async fn shutdown(&self) {
        info!("🛑 Initiating graceful shutdown of Service Islands...");
        self.semantic_cache.stop();
        self.monitor.shutdown().await;
        self.data_plane.shutdown().await;
        info!("✅ Service Islands shutdown complete");
    }
}
