//! Optimization Recommendations
//!
//! Threshold rules over the live process snapshot and per-endpoint
//! stats. Each firing rule becomes one actionable item with a severity
//! and an expected improvement estimate.

use serde::Serialize;

/// Severity bands for recommendations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// One optimization recommendation
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub rec_type: String,
    pub severity: Severity,
    pub description: String,
    pub action: String,
    pub expected_improvement: String,
}

/// Process-wide snapshot fed by the other islands' collectors
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessSnapshot {
    pub heap_bytes: u64,
    pub rss_bytes: u64,
    pub external_bytes: u64,
    /// Fraction of the connection pool currently checked out
    pub pool_utilization: f64,
    /// Average items per batch flush
    pub batching_efficiency: f64,
    pub cache_hit_rate: f64,
    pub query_latency_p95_ms: f64,
    pub query_latency_p99_ms: f64,
    /// Allocator/GC counters from whatever collector the host runs
    pub gc_stats: Option<serde_json::Value>,
}

/// Rule thresholds
const POOL_UTILIZATION_HIGH: f64 = 0.8;
const CACHE_HIT_RATE_LOW: f64 = 0.7;
const P95_LATENCY_HIGH_MS: f64 = 500.0;
const BATCHING_EFFICIENCY_LOW: f64 = 2.0;

/// Evaluate snapshot-level rules
#[must_use]
pub fn evaluate_snapshot(snapshot: &ProcessSnapshot) -> Vec<Recommendation> {
    let mut items = Vec::new();

    if snapshot.pool_utilization >= POOL_UTILIZATION_HIGH {
        items.push(Recommendation {
            rec_type: "connection_pool".to_string(),
            severity: Severity::High,
            description: format!(
                "Connection pool utilization at {:.0}%",
                snapshot.pool_utilization * 100.0
            ),
            action: "Raise max_connections or reduce per-request hold time".to_string(),
            expected_improvement: "Fewer acquire timeouts under load".to_string(),
        });
    }

    if snapshot.cache_hit_rate > 0.0 && snapshot.cache_hit_rate <= CACHE_HIT_RATE_LOW {
        items.push(Recommendation {
            rec_type: "cache".to_string(),
            severity: Severity::Medium,
            description: format!(
                "Cache hit rate at {:.0}%",
                snapshot.cache_hit_rate * 100.0
            ),
            action: "Increase cache budget or lower the similarity threshold".to_string(),
            expected_improvement: "Lower store and provider load".to_string(),
        });
    }

    if snapshot.query_latency_p95_ms >= P95_LATENCY_HIGH_MS {
        items.push(Recommendation {
            rec_type: "query_latency".to_string(),
            severity: Severity::High,
            description: format!(
                "p95 query latency at {:.0}ms",
                snapshot.query_latency_p95_ms
            ),
            action: "Enable result caching and tighten ef/limit rewrites".to_string(),
            expected_improvement: "p95 under 500ms".to_string(),
        });
    }

    if snapshot.batching_efficiency > 0.0 && snapshot.batching_efficiency < BATCHING_EFFICIENCY_LOW
    {
        items.push(Recommendation {
            rec_type: "batching".to_string(),
            severity: Severity::Low,
            description: format!(
                "Batches average {:.1} items",
                snapshot.batching_efficiency
            ),
            action: "Raise max_wait_time_ms so more operations coalesce".to_string(),
            expected_improvement: "Fewer store round trips".to_string(),
        });
    }

    items
}

/// Evaluate one endpoint's rolled-up stats
#[must_use]
pub fn evaluate_endpoint(
    endpoint: &str,
    error_rate: f64,
    avg_latency_ms: f64,
) -> Vec<Recommendation> {
    let mut items = Vec::new();
    if error_rate > 0.1 {
        items.push(Recommendation {
            rec_type: "endpoint_errors".to_string(),
            severity: Severity::High,
            description: format!("{endpoint} error rate at {:.0}%", error_rate * 100.0),
            action: "Lower the endpoint's routing priority or check provider status".to_string(),
            expected_improvement: "Fewer failed requests and retries".to_string(),
        });
    }
    if avg_latency_ms > 5_000.0 {
        items.push(Recommendation {
            rec_type: "endpoint_latency".to_string(),
            severity: Severity::Medium,
            description: format!("{endpoint} average latency at {avg_latency_ms:.0}ms"),
            action: "Prefer faster alternatives for latency-sensitive requests".to_string(),
            expected_improvement: "Lower end-to-end response times".to_string(),
        });
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_saturation_is_high_severity() {
        let snapshot = ProcessSnapshot {
            pool_utilization: 0.85,
            ..ProcessSnapshot::default()
        };
        let items = evaluate_snapshot(&snapshot);
        assert!(items
            .iter()
            .any(|r| r.rec_type == "connection_pool" && r.severity == Severity::High));
    }

    #[test]
    fn test_quiet_snapshot_yields_nothing() {
        let snapshot = ProcessSnapshot {
            pool_utilization: 0.2,
            batching_efficiency: 8.0,
            cache_hit_rate: 0.9,
            query_latency_p95_ms: 40.0,
            ..ProcessSnapshot::default()
        };
        assert!(evaluate_snapshot(&snapshot).is_empty());
    }

    #[test]
    fn test_low_cache_hit_rate_flagged() {
        let snapshot = ProcessSnapshot {
            cache_hit_rate: 0.5,
            ..ProcessSnapshot::default()
        };
        let items = evaluate_snapshot(&snapshot);
        assert!(items.iter().any(|r| r.severity == Severity::Medium));
    }

    #[test]
    fn test_flaky_endpoint_flagged() {
        let items = evaluate_endpoint("gpt-fast", 0.25, 120.0);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].severity, Severity::High);
    }
}
