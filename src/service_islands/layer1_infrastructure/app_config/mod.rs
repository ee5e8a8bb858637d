//! Gateway Configuration
//!
//! Config structs for every island, with defaults matching production
//! deployments. Values can be overridden programmatically or, for the
//! handful of deployment-specific knobs, from environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::service_islands::layer5_business_logic::shared::error::{
    GatewayError, GatewayResult,
};

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub min_connections: usize,
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_retries: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            acquire_timeout_ms: 5_000,
            idle_timeout_ms: 300_000,
            max_retries: 3,
        }
    }
}

impl PoolConfig {
    #[inline]
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Request batcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherConfig {
    pub max_batch_size: usize,
    pub max_wait_time_ms: u64,
    pub max_concurrent_batches: usize,
    pub priority_levels: u8,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_wait_time_ms: 10,
            max_concurrent_batches: 4,
            priority_levels: 3,
        }
    }
}

/// Prefetch cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    pub enabled: bool,
    /// Upper bound on cached bytes, not entries
    pub max_cache_size: usize,
    /// Fraction of the peak access frequency that triggers related-key prefetch
    pub prefetch_threshold: f64,
    pub background_refresh_interval_ms: u64,
    pub popularity_decay_factor: f64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cache_size: 64 * 1024 * 1024,
            prefetch_threshold: 0.3,
            background_refresh_interval_ms: 60_000,
            popularity_decay_factor: 0.9,
        }
    }
}

/// Query optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub enable_index_hints: bool,
    pub enable_query_rewriting: bool,
    pub enable_result_caching: bool,
    pub max_complexity: f64,
    pub timeout_ms: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enable_index_hints: true,
            enable_query_rewriting: true,
            enable_result_caching: true,
            max_complexity: 50.0,
            timeout_ms: 5_000,
        }
    }
}

/// Eviction policies for the semantic cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    SemanticRelevance,
    Hybrid,
}

/// Semantic cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticCacheConfig {
    /// Cosine similarity a KNN hit must reach to count as a cache hit
    pub similarity_threshold: f64,
    /// Upper bound on cached entries (not bytes)
    pub max_cache_size: usize,
    pub default_ttl_ms: u64,
    pub enable_eviction: bool,
    pub eviction_policy: EvictionPolicy,
    pub compression_enabled: bool,
    /// Entries below this quality are never admitted and never returned
    pub quality_threshold: f64,
    pub warmup_queries: Vec<String>,
    pub enable_normalization: bool,
    pub cache_by_model: bool,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            max_cache_size: 10_000,
            default_ttl_ms: 3_600_000,
            enable_eviction: true,
            eviction_policy: EvictionPolicy::Hybrid,
            compression_enabled: true,
            quality_threshold: 0.7,
            warmup_queries: Vec::new(),
            enable_normalization: true,
            cache_by_model: false,
        }
    }
}

impl SemanticCacheConfig {
    #[inline]
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

/// Routing strategy presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    Performance,
    Cost,
    Quality,
    Balanced,
}

/// Weights applied to the candidate scoring terms
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoutingWeights {
    pub performance: f64,
    pub cost: f64,
    pub quality: f64,
    pub availability: f64,
}

impl Default for RoutingWeights {
    fn default() -> Self {
        Self {
            performance: 0.4,
            cost: 0.2,
            quality: 0.3,
            availability: 0.1,
        }
    }
}

impl RoutingStrategy {
    /// Preset weights for each strategy
    #[must_use]
    pub fn weights(self) -> RoutingWeights {
        match self {
            Self::Performance => RoutingWeights {
                performance: 0.6,
                cost: 0.1,
                quality: 0.2,
                availability: 0.1,
            },
            Self::Cost => RoutingWeights {
                performance: 0.2,
                cost: 0.5,
                quality: 0.2,
                availability: 0.1,
            },
            Self::Quality => RoutingWeights {
                performance: 0.2,
                cost: 0.1,
                quality: 0.5,
                availability: 0.2,
            },
            Self::Balanced => RoutingWeights::default(),
        }
    }
}

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub strategy: RoutingStrategy,
    pub enable_load_balancing: bool,
    pub enable_failover: bool,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Explicit weights override the strategy preset when set
    pub weights: Option<RoutingWeights>,
    pub cost_optimization: bool,
    pub latency_optimization: bool,
    pub quality_optimization: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::Balanced,
            enable_load_balancing: true,
            enable_failover: true,
            max_retries: 3,
            retry_delay_ms: 200,
            weights: None,
            cost_optimization: true,
            latency_optimization: true,
            quality_optimization: true,
        }
    }
}

impl RouterConfig {
    /// Effective scoring weights: explicit override or strategy preset
    #[inline]
    #[must_use]
    pub fn effective_weights(&self) -> RoutingWeights {
        self.weights.unwrap_or_else(|| self.strategy.weights())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Quiet period before an open circuit admits a probe request
    pub open_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_ms: 60_000,
        }
    }
}

impl BreakerConfig {
    #[inline]
    #[must_use]
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

/// Performance monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub flush_interval_ms: u64,
    /// Buffered points that force an early flush
    pub buffer_capacity: usize,
    pub retention_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 5_000,
            buffer_capacity: 100,
            retention_ms: 24 * 3_600_000,
        }
    }
}

/// Cross-modal matcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossModalConfig {
    pub similarity_threshold: f64,
    pub max_matches_per_type: usize,
    pub enable_semantic_bridging: bool,
    /// Matches with contextual relevance below this are dropped
    pub min_contextual_relevance: f64,
}

impl Default for CrossModalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            max_matches_per_type: 5,
            enable_semantic_bridging: true,
            min_contextual_relevance: 0.3,
        }
    }
}

/// Aggregate configuration for the whole gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub pool: PoolConfig,
    pub batcher: BatcherConfig,
    pub prefetch: PrefetchConfig,
    pub optimizer: OptimizerConfig,
    pub semantic_cache: SemanticCacheConfig,
    pub router: RouterConfig,
    pub breaker: BreakerConfig,
    pub monitor: MonitorConfig,
    pub cross_modal: CrossModalConfig,
    /// Key prefix for embedding documents
    pub embedding_prefix: String,
    /// Embedding dimension; all embedders in a process must agree
    pub embedding_dimension: usize,
}

impl GatewayConfig {
    /// Build a config with defaults plus environment overrides
    ///
    /// Only deployment-level knobs are read from the environment; the
    /// rest is code-level configuration.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self {
            embedding_prefix: "embeddings".to_string(),
            embedding_dimension: 1536,
            ..Self::default()
        };
        if let Ok(dim) = std::env::var("GATEWAY_EMBEDDING_DIM") {
            if let Ok(parsed) = dim.parse() {
                config.embedding_dimension = parsed;
            }
        }
        if let Ok(max) = std::env::var("GATEWAY_POOL_MAX") {
            if let Ok(parsed) = max.parse() {
                config.pool.max_connections = parsed;
            }
        }
        config
    }

    /// Validate cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Validation` when a bound is inconsistent.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.pool.min_connections > self.pool.max_connections {
            return Err(GatewayError::Validation(format!(
                "pool min_connections {} exceeds max_connections {}",
                self.pool.min_connections, self.pool.max_connections
            )));
        }
        if self.pool.max_connections == 0 {
            return Err(GatewayError::Validation(
                "pool max_connections must be positive".to_string(),
            ));
        }
        if self.batcher.max_batch_size == 0 || self.batcher.priority_levels == 0 {
            return Err(GatewayError::Validation(
                "batcher sizes must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.semantic_cache.similarity_threshold) {
            return Err(GatewayError::Validation(format!(
                "similarity_threshold {} outside [0, 1]",
                self.semantic_cache.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.semantic_cache.quality_threshold) {
            return Err(GatewayError::Validation(format!(
                "quality_threshold {} outside [0, 1]",
                self.semantic_cache.quality_threshold
            )));
        }
        if self.embedding_dimension == 0 {
            return Err(GatewayError::Validation(
                "embedding_dimension must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            batcher: BatcherConfig::default(),
            prefetch: PrefetchConfig::default(),
            optimizer: OptimizerConfig::default(),
            semantic_cache: SemanticCacheConfig::default(),
            router: RouterConfig::default(),
            breaker: BreakerConfig::default(),
            monitor: MonitorConfig::default(),
            cross_modal: CrossModalConfig::default(),
            embedding_prefix: "embeddings".to_string(),
            embedding_dimension: 1536,
        }
    }
}
