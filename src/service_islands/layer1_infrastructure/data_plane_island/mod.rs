//! Data Plane Island
//!
//! The store-facing accelerator stack:
//! - Connection Pool: bounded, health-checked store sessions
//! - Request Batcher: coalesces same-kind operations into grouped calls
//! - Prefetch Cache: read-through cache with pattern-driven prefetching
//! - Query Optimizer: plans and caches vector searches
//!
//! Application key-value traffic flows Prefetch → Batcher → Pool →
//! store; vector search flows through the optimizer over the same
//! pipeline.

use std::sync::Arc;
use anyhow::Result;
use tracing::{debug, info};

use crate::service_islands::layer1_infrastructure::app_config::GatewayConfig;
use crate::service_islands::layer1_infrastructure::store_capability::ConnectionFactory;

pub mod connection_pool;
pub mod prefetch_cache;
pub mod query_optimizer;
pub mod request_batcher;

use connection_pool::ConnectionPool;
use prefetch_cache::PrefetchCache;
use query_optimizer::QueryOptimizer;
use request_batcher::RequestBatcher;

/// Data Plane Island
///
/// Owns the accelerator components and their background maintenance.
pub struct DataPlaneIsland {
    pub pool: Arc<ConnectionPool>,
    pub batcher: Arc<RequestBatcher>,
    pub prefetch: Arc<PrefetchCache>,
    pub optimizer: Arc<QueryOptimizer>,
}

impl DataPlaneIsland {
    /// Initialize the data plane over a connection factory
    ///
    /// # Errors
    ///
    /// Returns error when the configuration fails validation.
    pub fn new(config: &GatewayConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Self> {
        config.validate()?;
        info!("🏗️ Initializing Data Plane Island...");

        let pool = Arc::new(ConnectionPool::new(config.pool.clone(), factory));
        let batcher = Arc::new(RequestBatcher::new(config.batcher.clone()));
        let prefetch = Arc::new(PrefetchCache::new(config.prefetch.clone()));
        let optimizer = Arc::new(QueryOptimizer::new(config.optimizer.clone()));

        debug!(
            max_connections = config.pool.max_connections,
            max_batch_size = config.batcher.max_batch_size,
            prefetch_bytes = config.prefetch.max_cache_size,
            "Data plane configured"
        );

        Ok(Self {
            pool,
            batcher,
            prefetch,
            optimizer,
        })
    }

    /// Start pool maintenance and the prefetch refresh loop
    ///
    /// # Errors
    ///
    /// Returns error when a warm session for the refresh loop cannot
    /// be established.
    pub async fn start_background_processing(&self) -> Result<()> {
        self.pool.start_maintenance();
        let session = self.pool.acquire().await?;
        let store = Arc::clone(session.store());
        drop(session);
        self.prefetch.start_background_refresh(store);
        info!("✅ Data plane background processing started");
        Ok(())
    }

    /// Health: the pool must hand out a live session
    pub async fn health_check(&self) -> bool {
        self.pool.health_check().await
    }

    /// Stop background tasks and drain the pool
    pub async fn shutdown(&self) {
        self.prefetch.stop();
        self.pool.close().await;
    }

    /// Aggregated statistics for the island
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "island": "data_plane",
            "pool": self.pool.statistics(),
            "batcher": self.batcher.statistics(),
            "prefetch": self.prefetch.statistics(),
            "optimizer": self.optimizer.statistics(),
        })
    }
}
