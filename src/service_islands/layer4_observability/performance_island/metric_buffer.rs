//! Metric Buffers
//!
//! Bounded per-endpoint staging for metric points. Writers append
//! cheaply; the flusher drains a buffer as one unit, which serializes
//! writes per endpoint and keeps the persisted series in timestamp
//! order.

use parking_lot::Mutex;

/// Metric families tracked per endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Latency,
    Success,
    Errors,
    Cost,
    Accuracy,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Latency,
        MetricKind::Success,
        MetricKind::Errors,
        MetricKind::Cost,
        MetricKind::Accuracy,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Latency => "latency",
            Self::Success => "success",
            Self::Errors => "errors",
            Self::Cost => "cost",
            Self::Accuracy => "accuracy",
        }
    }
}

/// One timestamped measurement
#[derive(Debug, Clone, Copy)]
pub struct MetricPoint {
    pub kind: MetricKind,
    pub ts_ms: i64,
    pub value: f64,
}

/// Bounded staging buffer for one endpoint's points
pub struct MetricBuffer {
    points: Mutex<Vec<MetricPoint>>,
    capacity: usize,
}

impl MetricBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            points: Mutex::new(Vec::with_capacity(capacity.min(256))),
            capacity,
        }
    }

    /// Append a point; returns true when the buffer wants a flush
    pub fn push(&self, point: MetricPoint) -> bool {
        let mut points = self.points.lock();
        points.push(point);
        points.len() >= self.capacity
    }

    /// Drain everything, sorted into monotone timestamp order
    #[must_use]
    pub fn drain(&self) -> Vec<MetricPoint> {
        let mut points = std::mem::take(&mut *self.points.lock());
        points.sort_by_key(|p| p.ts_ms);
        points
    }

    /// Buffered point count
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.lock().is_empty()
    }
}
