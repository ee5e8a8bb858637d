//! Performance monitor scenarios: percentile sanity, windowed
//! roll-ups, health rules and recommendations.

mod common;

use redis_ai_gateway::service_islands::layer1_infrastructure::app_config::MonitorConfig;
use redis_ai_gateway::service_islands::layer4_observability::performance_island::{
    metric_buffer::MetricKind, recommendations::ProcessSnapshot, timeseries::Window,
    PerformanceMonitorIsland,
};
use redis_ai_gateway::service_islands::layer4_observability::performance_island::recommendations::Severity;

fn monitor() -> std::sync::Arc<PerformanceMonitorIsland> {
    PerformanceMonitorIsland::new(MonitorConfig {
        flush_interval_ms: 5_000,
        buffer_capacity: 100,
        retention_ms: 24 * 3_600_000,
    })
}

/// Latency samples 10, 20, …, 1000 give p50≈505, p95≈955, p99≈995
/// within one bucket, with the percentile ordering holding.
#[tokio::test]
async fn test_percentile_sanity() {
    let monitor = monitor();
    for i in 1..=100 {
        monitor
            .record("m1", MetricKind::Latency, f64::from(i) * 10.0)
            .await;
    }
    monitor.flush_all().await;

    let buckets = monitor.get_aggregated("m1", Window::OneHour, 24 * 3_600_000);
    assert_eq!(buckets.len(), 1, "samples recorded together share a bucket");
    let bucket = &buckets[0];
    assert_eq!(bucket.samples, 100);
    assert!((bucket.p50_latency_ms - 505.0).abs() <= 10.0);
    assert!((bucket.p95_latency_ms - 955.0).abs() <= 10.0);
    assert!((bucket.p99_latency_ms - 995.0).abs() <= 10.0);
    assert!(bucket.p99_latency_ms >= bucket.p95_latency_ms);
    assert!(bucket.p95_latency_ms >= bucket.p50_latency_ms);
}

/// The buffer self-flushes at capacity, so points show up in queries
/// even without the timer.
#[tokio::test]
async fn test_capacity_flush() {
    let monitor = PerformanceMonitorIsland::new(MonitorConfig {
        flush_interval_ms: 60_000,
        buffer_capacity: 10,
        retention_ms: 3_600_000,
    });
    for _ in 0..10 {
        monitor.record("m1", MetricKind::Latency, 100.0).await;
    }
    let stats = monitor
        .get_model_performance("m1", Window::FiveMinutes)
        .expect("capacity flush should have landed the points");
    assert!((stats.avg_latency_ms - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_windowed_rollup() {
    let monitor = monitor();
    for _ in 0..8 {
        monitor.record_request("m1", 200.0, true, 0.001).await;
    }
    for _ in 0..2 {
        monitor.record_request("m1", 400.0, false, 0.0).await;
    }
    monitor.flush_all().await;

    let stats = monitor
        .get_model_performance("m1", Window::FiveMinutes)
        .expect("samples recorded");
    assert!((stats.error_rate - 0.2).abs() < 1e-9);
    assert!((stats.availability - 0.8).abs() < 1e-9);
    assert!(stats.avg_latency_ms > 200.0 && stats.avg_latency_ms < 400.0);
    assert!(stats.throughput_rps > 0.0);
}

#[tokio::test]
async fn test_health_rules() {
    let monitor = monitor();
    // Healthy traffic
    for _ in 0..20 {
        monitor.record_request("steady", 150.0, true, 0.0).await;
    }
    // Flaky endpoint: one third errors
    for i in 0..30 {
        monitor.record_request("flaky", 150.0, i % 3 != 0, 0.0).await;
    }
    monitor.flush_all().await;

    assert!(monitor.get_health("steady").healthy);
    let flaky = monitor.get_health("flaky");
    assert!(!flaky.healthy);
    assert!(!flaky.reasons.is_empty());

    // No traffic is not unhealthy
    assert!(monitor.get_health("unknown").healthy);
}

#[tokio::test]
async fn test_recommendations_fire_on_thresholds() {
    let monitor = monitor();
    monitor.record_snapshot(ProcessSnapshot {
        pool_utilization: 0.9,
        cache_hit_rate: 0.5,
        batching_efficiency: 1.2,
        query_latency_p95_ms: 800.0,
        ..ProcessSnapshot::default()
    });
    let items = monitor.generate_recommendations();

    assert!(items
        .iter()
        .any(|r| r.rec_type == "connection_pool" && r.severity == Severity::High));
    assert!(items.iter().any(|r| r.rec_type == "cache"));
    assert!(items
        .iter()
        .any(|r| r.rec_type == "query_latency" && r.severity == Severity::High));
    assert!(items.iter().any(|r| r.rec_type == "batching"));
}

/// Retention trims the in-memory series; a quiet snapshot produces no
/// recommendations.
#[tokio::test]
async fn test_quiet_system_no_recommendations() {
    let monitor = monitor();
    monitor.record_snapshot(ProcessSnapshot {
        pool_utilization: 0.2,
        cache_hit_rate: 0.95,
        batching_efficiency: 6.0,
        query_latency_p95_ms: 50.0,
        ..ProcessSnapshot::default()
    });
    assert!(monitor.generate_recommendations().is_empty());
}
