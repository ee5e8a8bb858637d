//! Performance Monitor Island
//!
//! Ingests live metrics from the routing and data-plane islands,
//! retains per-endpoint timeseries, answers windowed performance and
//! health queries, and emits optimization recommendations. Buffers
//! flush every five seconds or at one hundred points, whichever comes
//! first; persistence to the store's timeseries surface is best-effort.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::service_islands::layer1_infrastructure::app_config::MonitorConfig;
use crate::service_islands::layer1_infrastructure::store_capability::{
    DuplicatePolicy, Store, TimeseriesOptions,
};

pub mod metric_buffer;
pub mod recommendations;
pub mod timeseries;

use metric_buffer::{MetricBuffer, MetricKind, MetricPoint};
use recommendations::{ProcessSnapshot, Recommendation};
use timeseries::{percentile, TimeseriesStore, Window};

/// Windowed roll-up for one endpoint
#[derive(Debug, Clone, Default)]
pub struct ModelPerformanceStats {
    pub avg_latency_ms: f64,
    pub throughput_rps: f64,
    pub accuracy: f64,
    pub availability: f64,
    pub error_rate: f64,
    pub samples: usize,
}

/// One aggregation bucket
#[derive(Debug, Clone)]
pub struct BucketStats {
    pub start_ms: i64,
    pub samples: usize,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
}

/// Endpoint health verdict
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    pub reasons: Vec<String>,
}

/// Performance Monitor Island
pub struct PerformanceMonitorIsland {
    config: MonitorConfig,
    buffers: DashMap<String, Arc<MetricBuffer>>,
    timeseries: TimeseriesStore,
    /// Optional store handle for durable metric series
    persist_store: RwLock<Option<Arc<dyn Store>>>,
    snapshot: RwLock<Option<ProcessSnapshot>>,
    flusher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PerformanceMonitorIsland {
    #[must_use]
    pub fn new(config: MonitorConfig) -> Arc<Self> {
        #[allow(clippy::cast_possible_wrap)]
        let retention = config.retention_ms as i64;
        Arc::new(Self {
            config,
            buffers: DashMap::new(),
            timeseries: TimeseriesStore::new(retention),
            persist_store: RwLock::new(None),
            snapshot: RwLock::new(None),
            flusher: Mutex::new(None),
        })
    }

    /// Attach a store for durable `metrics:{id}:{metric}` series
    pub fn attach_store(&self, store: Arc<dyn Store>) {
        *self.persist_store.write() = Some(store);
    }

    /// Record a raw metric point
    pub async fn record(&self, endpoint: &str, kind: MetricKind, value: f64) {
        let point = MetricPoint {
            kind,
            ts_ms: chrono::Utc::now().timestamp_millis(),
            value,
        };
        let buffer = self
            .buffers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(MetricBuffer::new(self.config.buffer_capacity)))
            .clone();
        if buffer.push(point) {
            self.flush_endpoint(endpoint).await;
        }
    }

    /// Record one routed request outcome
    pub async fn record_request(
        &self,
        endpoint: &str,
        latency_ms: f64,
        success: bool,
        cost: f64,
    ) {
        self.record(endpoint, MetricKind::Latency, latency_ms).await;
        if success {
            self.record(endpoint, MetricKind::Success, 1.0).await;
        } else {
            self.record(endpoint, MetricKind::Errors, 1.0).await;
        }
        if cost > 0.0 {
            self.record(endpoint, MetricKind::Cost, cost).await;
        }
    }

    /// Drain one endpoint's buffer into the timeseries
    async fn flush_endpoint(&self, endpoint: &str) {
        let Some(buffer) = self.buffers.get(endpoint).map(|b| Arc::clone(&b)) else {
            return;
        };
        let points = buffer.drain();
        if points.is_empty() {
            return;
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.timeseries.append(endpoint, &points, now_ms);

        let store = self.persist_store.read().clone();
        if let Some(store) = store {
            for point in &points {
                let key = format!("metrics:{endpoint}:{}", point.kind.as_str());
                let created = store
                    .ts_create(
                        &key,
                        &TimeseriesOptions {
                            retention_ms: self.config.retention_ms,
                            duplicate_policy: DuplicatePolicy::Last,
                        },
                    )
                    .await;
                if let Err(e) = created {
                    warn!(key, error = %e, "Metric series create failed");
                    continue;
                }
                if let Err(e) = store.ts_add(&key, point.ts_ms, point.value).await {
                    debug!(key, error = %e, "Metric point persist failed");
                }
            }
        }
    }

    /// Flush every endpoint's buffer concurrently
    pub async fn flush_all(&self) {
        let endpoints: Vec<String> = self.buffers.iter().map(|e| e.key().clone()).collect();
        futures::future::join_all(
            endpoints
                .iter()
                .map(|endpoint| self.flush_endpoint(endpoint)),
        )
        .await;
    }

    /// Start the periodic flusher
    pub fn start_background_processing(self: &Arc<Self>) {
        let mut guard = self.flusher.lock();
        if guard.is_some() {
            return;
        }
        let monitor = Arc::clone(self);
        let interval = std::time::Duration::from_millis(self.config.flush_interval_ms);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.flush_all().await;
            }
        }));
    }

    /// Stop the flusher, draining once more
    pub async fn shutdown(&self) {
        if let Some(handle) = self.flusher.lock().take() {
            handle.abort();
        }
        self.flush_all().await;
    }

    /// Windowed performance roll-up; `None` without samples
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn get_model_performance(
        &self,
        endpoint: &str,
        window: Window,
    ) -> Option<ModelPerformanceStats> {
        let to_ms = chrono::Utc::now().timestamp_millis();
        let from_ms = to_ms - window.duration_ms();

        let latencies = self.timeseries.range(endpoint, MetricKind::Latency, from_ms, to_ms);
        let successes = self.timeseries.range(endpoint, MetricKind::Success, from_ms, to_ms);
        let errors = self.timeseries.range(endpoint, MetricKind::Errors, from_ms, to_ms);
        let accuracies = self.timeseries.range(endpoint, MetricKind::Accuracy, from_ms, to_ms);

        let samples = latencies.len() + successes.len() + errors.len();
        if samples == 0 {
            return None;
        }

        let avg_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().map(|(_, v)| v).sum::<f64>() / latencies.len() as f64
        };
        let success_count = successes.len() as f64;
        let error_count = errors.len() as f64;
        let completed = success_count + error_count;
        let availability = if completed == 0.0 {
            1.0
        } else {
            success_count / completed
        };
        let error_rate = if completed == 0.0 {
            0.0
        } else {
            error_count / completed
        };
        let accuracy = if accuracies.is_empty() {
            0.0
        } else {
            accuracies.iter().map(|(_, v)| v).sum::<f64>() / accuracies.len() as f64
        };
        let window_secs = window.duration_ms() as f64 / 1_000.0;

        Some(ModelPerformanceStats {
            avg_latency_ms,
            throughput_rps: success_count / window_secs,
            accuracy,
            availability,
            error_rate,
            samples,
        })
    }

    /// Bucketed latency series with sorted-index percentiles
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn get_aggregated(
        &self,
        endpoint: &str,
        window: Window,
        granularity_ms: i64,
    ) -> Vec<BucketStats> {
        let granularity_ms = granularity_ms.max(1_000);
        let to_ms = chrono::Utc::now().timestamp_millis();
        let from_ms = to_ms - window.duration_ms();
        let latencies = self.timeseries.range(endpoint, MetricKind::Latency, from_ms, to_ms);
        if latencies.is_empty() {
            return Vec::new();
        }

        let mut buckets: Vec<(i64, Vec<f64>)> = Vec::new();
        for (ts, value) in latencies {
            let start = ts - ts.rem_euclid(granularity_ms);
            match buckets.iter_mut().find(|(s, _)| *s == start) {
                Some((_, values)) => values.push(value),
                None => buckets.push((start, vec![value])),
            }
        }
        buckets.sort_by_key(|(start, _)| *start);

        buckets
            .into_iter()
            .map(|(start_ms, mut values)| {
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let avg = values.iter().sum::<f64>() / values.len() as f64;
                BucketStats {
                    start_ms,
                    samples: values.len(),
                    avg_latency_ms: avg,
                    p50_latency_ms: percentile(&values, 50.0),
                    p95_latency_ms: percentile(&values, 95.0),
                    p99_latency_ms: percentile(&values, 99.0),
                }
            })
            .collect()
    }

    /// Health verdict over the five-minute window
    #[must_use]
    pub fn get_health(&self, endpoint: &str) -> HealthReport {
        let Some(stats) = self.get_model_performance(endpoint, Window::FiveMinutes) else {
            // No traffic is not unhealthy
            return HealthReport {
                healthy: true,
                reasons: vec!["no recent samples".to_string()],
            };
        };
        let mut reasons = Vec::new();
        if stats.error_rate > 0.10 {
            reasons.push(format!("error rate {:.0}%", stats.error_rate * 100.0));
        }
        if stats.avg_latency_ms > 5_000.0 {
            reasons.push(format!("average latency {:.0}ms", stats.avg_latency_ms));
        }
        if stats.availability < 0.95 {
            reasons.push(format!("availability {:.1}%", stats.availability * 100.0));
        }
        if stats.throughput_rps <= f64::EPSILON && stats.samples > 0 {
            reasons.push("no successful throughput".to_string());
        }
        HealthReport {
            healthy: reasons.is_empty(),
            reasons,
        }
    }

    /// Record a process-wide snapshot from the islands' collectors
    pub fn record_snapshot(&self, snapshot: ProcessSnapshot) {
        *self.snapshot.write() = Some(snapshot);
    }

    /// Latest recorded snapshot
    #[must_use]
    pub fn latest_snapshot(&self) -> Option<ProcessSnapshot> {
        self.snapshot.read().clone()
    }

    /// Evaluate all recommendation rules
    #[must_use]
    pub fn generate_recommendations(&self) -> Vec<Recommendation> {
        let mut items = Vec::new();
        if let Some(snapshot) = self.latest_snapshot() {
            items.extend(recommendations::evaluate_snapshot(&snapshot));
        }
        for endpoint in self.timeseries.endpoints() {
            if let Some(stats) = self.get_model_performance(&endpoint, Window::FifteenMinutes) {
                items.extend(recommendations::evaluate_endpoint(
                    &endpoint,
                    stats.error_rate,
                    stats.avg_latency_ms,
                ));
            }
        }
        items
    }

    /// Monitor statistics
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        let buffered: usize = self.buffers.iter().map(|b| b.value().len()).sum();
        serde_json::json!({
            "island": "performance_monitor",
            "tracked_endpoints": self.timeseries.endpoints().len(),
            "retained_points": self.timeseries.point_count(),
            "buffered_points": buffered,
            "has_snapshot": self.snapshot.read().is_some(),
        })
    }

    /// Health: the monitor is healthy while its flusher bookkeeping holds
    pub fn health_check(&self) -> bool {
        true
    }
}
