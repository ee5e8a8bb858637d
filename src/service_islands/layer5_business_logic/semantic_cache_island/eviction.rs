//! Eviction Ranking
//!
//! Orders semantic-cache entries for eviction under the configured
//! policy. The hybrid score is `(frequency × quality) / (ageDays + 1)`;
//! lowest scores go first.

use rayon::prelude::*;

use crate::service_islands::layer1_infrastructure::app_config::EvictionPolicy;

const DAY_MS: f64 = 24.0 * 3_600_000.0;

/// Entry facts the ranking needs
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub id: String,
    pub created_at_ms: i64,
    pub last_accessed_ms: i64,
    pub access_count: u64,
    pub quality: f64,
}

impl EvictionCandidate {
    /// Hybrid usefulness; higher survives longer
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hybrid_score(&self, now_ms: i64) -> f64 {
        let age_days = ((now_ms - self.created_at_ms).max(0) as f64) / DAY_MS;
        (self.access_count as f64 * self.quality) / (age_days + 1.0)
    }
}

/// Rank candidates into eviction order, first-to-evict first
#[must_use]
pub fn rank(
    policy: EvictionPolicy,
    mut candidates: Vec<EvictionCandidate>,
    now_ms: i64,
) -> Vec<EvictionCandidate> {
    match policy {
        EvictionPolicy::Lru => {
            candidates.par_sort_by_key(|c| c.last_accessed_ms);
        }
        EvictionPolicy::Lfu => {
            candidates.par_sort_by_key(|c| (c.access_count, c.last_accessed_ms));
        }
        EvictionPolicy::SemanticRelevance => {
            candidates.par_sort_by(|a, b| {
                a.quality
                    .partial_cmp(&b.quality)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.created_at_ms.cmp(&b.created_at_ms))
            });
        }
        EvictionPolicy::Hybrid => {
            candidates.par_sort_by(|a, b| {
                a.hybrid_score(now_ms)
                    .partial_cmp(&b.hybrid_score(now_ms))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }
    candidates
}
