//! Layer 4: Observability
//!
//! Live performance telemetry: metric ingestion, windowed queries,
//! endpoint health and optimization recommendations.

pub mod performance_island;

// Re-export the main island components for easy access
pub use performance_island::metric_buffer::MetricKind;
pub use performance_island::recommendations::{ProcessSnapshot, Recommendation, Severity};
pub use performance_island::timeseries::Window;
pub use performance_island::{HealthReport, ModelPerformanceStats, PerformanceMonitorIsland};
