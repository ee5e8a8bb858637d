//! Query Optimizer
//!
//! Rewrites vector search queries, estimates their cost, refuses the
//! ones over budget and caches results of the rest. The plan cache is
//! keyed by a normalized fingerprint; expensive plans keep their
//! results longer.

use moka::future::Cache;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use std::sync::Arc;
use tracing::debug;

use crate::service_islands::layer1_infrastructure::app_config::OptimizerConfig;
use crate::service_islands::layer1_infrastructure::store_capability::{
    KnnSpec, SearchOptions, Store,
};
use crate::service_islands::layer5_business_logic::shared::error::{
    GatewayError, GatewayResult,
};

/// Plan cache TTLs: default, and extended for plans costing over 10
const PLAN_TTL_DEFAULT: Duration = Duration::from_secs(5 * 60);
const PLAN_TTL_EXPENSIVE: Duration = Duration::from_secs(30 * 60);
const EXPENSIVE_COST: f64 = 10.0;
/// Result pages larger than this never use the consult-and-write path
const FULL_CACHE_LIMIT: usize = 50;

/// A vector search as submitted by the caller
#[derive(Debug, Clone)]
pub struct VectorSearchQuery {
    pub index: String,
    pub vector: Vec<f32>,
    pub limit: usize,
    /// Search-list parameter; the optimizer clamps it
    pub ef: Option<usize>,
    /// Tag filter expression, e.g. `@contentType:{image}`
    pub filter: Option<String>,
    /// Hits with similarity below this are dropped client-side
    pub threshold: Option<f64>,
    pub include_metadata: bool,
    pub include_vectors: bool,
}

/// How the backend should execute the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    Parallel,
    Sequential,
    Hybrid,
}

/// How results of the plan interact with the plan cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Bypass the cache entirely
    None,
    /// Write results, never consult
    Partial,
    /// Consult before executing and write after
    Full,
}

/// Optimized execution plan for one vector search
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub original: VectorSearchQuery,
    pub optimized: VectorSearchQuery,
    pub estimated_cost: f64,
    pub execution_strategy: ExecutionStrategy,
    pub index_hints: Vec<String>,
    pub cache_strategy: CacheStrategy,
}

/// One scored hit
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    /// Cosine similarity in [0, 1]
    pub score: f64,
    pub fields: HashMap<String, String>,
}

/// Parsed search result
#[derive(Debug, Clone)]
pub struct VectorSearchResult {
    pub total: u64,
    pub results: Vec<SearchHit>,
}

#[derive(Clone)]
struct CachedResult {
    result: VectorSearchResult,
    ttl: Duration,
}

struct PlanExpiry;

impl moka::Expiry<String, CachedResult> for PlanExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedResult,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Vector search planner and executor
pub struct QueryOptimizer {
    config: OptimizerConfig,
    plan_cache: Cache<String, CachedResult>,
    // Counters
    planned: AtomicU64,
    rejected: AtomicU64,
    executed: AtomicU64,
    cache_hits: AtomicU64,
}

impl QueryOptimizer {
    #[must_use]
    pub fn new(config: OptimizerConfig) -> Self {
        let plan_cache = Cache::builder()
            .max_capacity(10_000)
            .expire_after(PlanExpiry)
            .build();
        Self {
            config,
            plan_cache,
            planned: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    /// Cost model: `1 + dim/100 + ln(limit)/10`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate_cost(query: &VectorSearchQuery) -> f64 {
        let limit = query.limit.max(1) as f64;
        1.0 + query.vector.len() as f64 / 100.0 + limit.ln() / 10.0
    }

    /// Produce an execution plan for a vector search
    ///
    /// # Errors
    ///
    /// `ComplexityExceeded` when the estimated cost is over
    /// `max_complexity`. The rejection is still counted in metrics.
    pub fn optimize_vector_search(
        &self,
        query: VectorSearchQuery,
    ) -> GatewayResult<QueryPlan> {
        self.planned.fetch_add(1, Ordering::Relaxed);
        let cost = Self::estimate_cost(&query);
        if cost > self.config.max_complexity {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(GatewayError::ComplexityExceeded(format!(
                "estimated cost {cost:.2} exceeds budget {:.2}",
                self.config.max_complexity
            )));
        }

        let mut optimized = query.clone();
        if self.config.enable_query_rewriting {
            let target_ef = (query.limit * 2).max(100);
            optimized.ef = Some(match query.ef {
                Some(caller_ef) => caller_ef.min(target_ef),
                None => target_ef,
            });
        }

        let execution_strategy = if cost > 6.0 {
            ExecutionStrategy::Parallel
        } else if cost > 3.0 {
            ExecutionStrategy::Hybrid
        } else {
            ExecutionStrategy::Sequential
        };

        let mut index_hints = Vec::new();
        if self.config.enable_index_hints {
            index_hints.push("use-hnsw".to_string());
            if let Some(ef) = optimized.ef {
                index_hints.push(format!("ef_runtime={ef}"));
            }
            if optimized.filter.is_some() {
                index_hints.push("prefilter-tags".to_string());
            }
        }

        let cache_strategy = if !self.config.enable_result_caching {
            CacheStrategy::None
        } else if query.limit <= FULL_CACHE_LIMIT && !query.include_vectors {
            CacheStrategy::Full
        } else {
            CacheStrategy::Partial
        };

        Ok(QueryPlan {
            original: query,
            optimized,
            estimated_cost: cost,
            execution_strategy,
            index_hints,
            cache_strategy,
        })
    }

    /// Execute a plan, honoring its cache strategy and the timeout
    ///
    /// # Errors
    ///
    /// `Timeout` when execution exceeds the configured budget, `Store`
    /// when the backend search fails.
    pub async fn execute_optimized_query(
        &self,
        store: &Arc<dyn Store>,
        plan: &QueryPlan,
    ) -> GatewayResult<VectorSearchResult> {
        let fingerprint = Self::fingerprint(&plan.optimized);

        if plan.cache_strategy == CacheStrategy::Full {
            if let Some(cached) = self.plan_cache.get(&fingerprint).await {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint, "Plan cache hit");
                return Ok(cached.result);
            }
        }

        let query = &plan.optimized;
        let mut return_fields = Vec::new();
        if query.include_metadata {
            return_fields.extend(
                ["contentId", "contentType", "metadata", "createdAt"]
                    .iter()
                    .map(|s| (*s).to_string()),
            );
        }
        if query.include_vectors {
            return_fields.push("vector".to_string());
        }
        let opts = SearchOptions {
            knn: Some(KnnSpec {
                field: "vector".to_string(),
                k: query.limit,
                vector: query.vector.clone(),
                ef_runtime: query.ef,
                score_alias: "vector_score".to_string(),
            }),
            return_fields,
            sort_by: None,
            offset: 0,
            limit: query.limit,
        };
        let filter = query.filter.clone().unwrap_or_else(|| "*".to_string());

        debug!(
            index = %query.index,
            strategy = ?plan.execution_strategy,
            cost = plan.estimated_cost,
            "Executing optimized vector search"
        );
        let reply = tokio::time::timeout(
            Duration::from_millis(self.config.timeout_ms),
            store.ft_search(&query.index, &filter, &opts),
        )
        .await
        .map_err(|_| GatewayError::Timeout("vector search".to_string()))??;
        self.executed.fetch_add(1, Ordering::Relaxed);

        let mut results: Vec<SearchHit> = reply
            .docs
            .into_iter()
            .map(|doc| {
                let distance = doc.field_f64("vector_score").unwrap_or(1.0);
                let score = (1.0 - distance).clamp(0.0, 1.0);
                SearchHit {
                    id: doc.id,
                    score,
                    fields: doc.fields,
                }
            })
            .collect();
        if let Some(threshold) = query.threshold {
            results.retain(|hit| hit.score >= threshold);
        }
        let result = VectorSearchResult {
            total: reply.total,
            results,
        };

        if plan.cache_strategy != CacheStrategy::None {
            let ttl = if plan.estimated_cost > EXPENSIVE_COST {
                PLAN_TTL_EXPENSIVE
            } else {
                PLAN_TTL_DEFAULT
            };
            self.plan_cache
                .insert(
                    fingerprint,
                    CachedResult {
                        result: result.clone(),
                        ttl,
                    },
                )
                .await;
        }

        Ok(result)
    }

    /// Normalized fingerprint of the optimized query
    fn fingerprint(query: &VectorSearchQuery) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(query.index.as_bytes());
        hasher.update(&query.limit.to_le_bytes());
        hasher.update(&query.ef.unwrap_or(0).to_le_bytes());
        if let Some(filter) = &query.filter {
            hasher.update(filter.as_bytes());
        }
        for component in &query.vector {
            hasher.update(&component.to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Optimizer statistics
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "planned": self.planned.load(Ordering::Relaxed),
            "rejected": self.rejected.load(Ordering::Relaxed),
            "executed": self.executed.load(Ordering::Relaxed),
            "plan_cache_hits": self.cache_hits.load(Ordering::Relaxed),
            "plan_cache_entries": self.plan_cache.entry_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(dim: usize, limit: usize) -> VectorSearchQuery {
        VectorSearchQuery {
            index: "idx".to_string(),
            vector: vec![0.5; dim],
            limit,
            ef: None,
            filter: None,
            threshold: None,
            include_metadata: false,
            include_vectors: false,
        }
    }

    #[test]
    fn test_cost_model() {
        let cost = QueryOptimizer::estimate_cost(&query(100, 1));
        assert!((cost - 2.0).abs() < 1e-9);
        let larger = QueryOptimizer::estimate_cost(&query(1536, 10));
        assert!(larger > cost);
    }

    #[test]
    fn test_complexity_refusal() {
        let optimizer = QueryOptimizer::new(OptimizerConfig {
            max_complexity: 5.0,
            ..OptimizerConfig::default()
        });
        // dim 1100 -> cost ≈ 12
        let err = optimizer.optimize_vector_search(query(1100, 10)).unwrap_err();
        assert_eq!(err.tag(), "complexity_exceeded");
        let stats = optimizer.statistics();
        assert_eq!(stats["rejected"], 1);
        assert_eq!(stats["planned"], 1);
    }

    #[test]
    fn test_ef_clamping() {
        let optimizer = QueryOptimizer::new(OptimizerConfig::default());
        // No caller ef: clamp target applies
        let plan = optimizer.optimize_vector_search(query(10, 10)).unwrap();
        assert_eq!(plan.optimized.ef, Some(100));
        // Caller ef below target is preserved
        let mut q = query(10, 10);
        q.ef = Some(64);
        let plan = optimizer.optimize_vector_search(q).unwrap();
        assert_eq!(plan.optimized.ef, Some(64));
        // Caller ef above target is clamped down
        let mut q = query(10, 120);
        q.ef = Some(1000);
        let plan = optimizer.optimize_vector_search(q).unwrap();
        assert_eq!(plan.optimized.ef, Some(240));
    }

    #[test]
    fn test_cache_strategy_selection() {
        let optimizer = QueryOptimizer::new(OptimizerConfig::default());
        let plan = optimizer.optimize_vector_search(query(10, 10)).unwrap();
        assert_eq!(plan.cache_strategy, CacheStrategy::Full);

        let mut with_vectors = query(10, 10);
        with_vectors.include_vectors = true;
        let plan = optimizer.optimize_vector_search(with_vectors).unwrap();
        assert_eq!(plan.cache_strategy, CacheStrategy::Partial);

        let disabled = QueryOptimizer::new(OptimizerConfig {
            enable_result_caching: false,
            ..OptimizerConfig::default()
        });
        let plan = disabled.optimize_vector_search(query(10, 10)).unwrap();
        assert_eq!(plan.cache_strategy, CacheStrategy::None);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = QueryOptimizer::fingerprint(&query(8, 5));
        let b = QueryOptimizer::fingerprint(&query(8, 5));
        assert_eq!(a, b);
        let c = QueryOptimizer::fingerprint(&query(8, 6));
        assert_ne!(a, c);
    }
}
