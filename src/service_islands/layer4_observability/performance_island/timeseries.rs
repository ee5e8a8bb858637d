//! In-Memory Metric Timeseries
//!
//! Per-endpoint, per-metric series with bounded retention. Queries
//! window over the raw points; percentiles use sorted-index selection,
//! which keeps p99 ≥ p95 ≥ p50 by construction.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;

use super::metric_buffer::{MetricKind, MetricPoint};

/// Query windows offered by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    Day,
}

impl Window {
    #[must_use]
    pub fn duration_ms(self) -> i64 {
        match self {
            Self::OneMinute => 60_000,
            Self::FiveMinutes => 5 * 60_000,
            Self::FifteenMinutes => 15 * 60_000,
            Self::OneHour => 3_600_000,
            Self::Day => 24 * 3_600_000,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::Day => "24h",
        }
    }
}

/// Retained series per `(endpoint, metric)` pair
pub struct TimeseriesStore {
    series: DashMap<(String, MetricKind), RwLock<VecDeque<(i64, f64)>>>,
    retention_ms: i64,
}

impl TimeseriesStore {
    #[must_use]
    pub fn new(retention_ms: i64) -> Self {
        Self {
            series: DashMap::new(),
            retention_ms,
        }
    }

    /// Append drained points for one endpoint, trimming retention.
    /// Points arrive sorted from the buffer drain, so appended series
    /// stay in monotone timestamp order.
    pub fn append(&self, endpoint: &str, points: &[MetricPoint], now_ms: i64) {
        let cutoff = now_ms - self.retention_ms;
        for point in points {
            let key = (endpoint.to_string(), point.kind);
            let series = self
                .series
                .entry(key)
                .or_insert_with(|| RwLock::new(VecDeque::new()));
            let mut guard = series.write();
            guard.push_back((point.ts_ms, point.value));
            while guard.front().is_some_and(|(ts, _)| *ts < cutoff) {
                guard.pop_front();
            }
        }
    }

    /// Points for one metric inside `[from_ms, to_ms]`
    #[must_use]
    pub fn range(
        &self,
        endpoint: &str,
        kind: MetricKind,
        from_ms: i64,
        to_ms: i64,
    ) -> Vec<(i64, f64)> {
        match self.series.get(&(endpoint.to_string(), kind)) {
            Some(series) => series
                .read()
                .iter()
                .filter(|(ts, _)| *ts >= from_ms && *ts <= to_ms)
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Endpoints with any retained series
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .series
            .iter()
            .map(|entry| entry.key().0.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Total retained points
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.series.iter().map(|entry| entry.value().read().len()).sum()
    }
}

/// Sorted-index percentile: `values` must be ascending.
/// Index is `ceil(p/100 × n) − 1`, clamped into the sample range.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (p / 100.0 * n as f64).ceil() as usize;
    let index = rank.clamp(1, n) - 1;
    sorted.get(index).copied().unwrap_or(0.0)
}
