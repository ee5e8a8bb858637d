//! Cross-Modal Matcher Island
//!
//! Finds related items in other content modalities for a source
//! embedding. Direct matches come from per-modality KNN; sparse
//! results fall back to semantic bridging through the text modality.
//! Raw similarity is reweighted by contextual relevance (tag overlap,
//! path overlap, temporal proximity) before ranking.

use moka::future::Cache;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::service_islands::layer1_infrastructure::app_config::CrossModalConfig;
use crate::service_islands::layer3_communication::vector_store_island::{
    ContentType, EmbeddingDocument, SimilarityOptions, VectorStoreAdapter,
};
use crate::service_islands::layer5_business_logic::shared::error::GatewayResult;

/// Bridge search width
const BRIDGE_HITS: usize = 3;
/// Confidence discount applied to two-hop bridged matches
const BRIDGE_DISCOUNT: f64 = 0.8;
/// Direct results below this trigger bridging
const SPARSE_THRESHOLD: usize = 2;
/// Result cache TTL
const MATCH_CACHE_TTL: Duration = Duration::from_secs(60);
/// Temporal proximity horizon
const TEMPORAL_HORIZON_MS: f64 = 7.0 * 24.0 * 3_600_000.0;

/// Relationship labels between modalities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    SimilarTo,
    Illustrates,
    Describes,
    Documents,
    Implements,
    ExampleOf,
    TranscriptOf,
    RelatedTo,
}

/// Context steering the relevance reweighting
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    pub tags: Vec<String>,
    pub source_path: Option<String>,
    pub timestamp_ms: Option<i64>,
}

/// One cross-modal match
#[derive(Debug, Clone)]
pub struct CrossModalMatch {
    pub content_id: String,
    pub content_type: ContentType,
    /// Final score after contextual reweighting (and bridge discount)
    pub score: f64,
    pub relationship: RelationshipKind,
    pub bridged: bool,
}

#[derive(Clone)]
struct CachedMatches {
    matches: Vec<CrossModalMatch>,
    /// When this result set was computed; distinct from any relevance value
    cached_at: i64,
}

/// Cross-Modal Matcher
pub struct CrossModalMatcher {
    vector_store: Arc<VectorStoreAdapter>,
    config: CrossModalConfig,
    result_cache: Cache<String, Arc<CachedMatches>>,
}

impl CrossModalMatcher {
    #[must_use]
    pub fn new(vector_store: Arc<VectorStoreAdapter>, config: CrossModalConfig) -> Self {
        let result_cache = Cache::builder()
            .max_capacity(1_000)
            .time_to_live(MATCH_CACHE_TTL)
            .build();
        Self {
            vector_store,
            config,
            result_cache,
        }
    }

    /// Related items for a source embedding across target modalities
    ///
    /// # Errors
    ///
    /// `Store` when an underlying search fails.
    pub async fn find_related(
        &self,
        source: &EmbeddingDocument,
        targets: &[ContentType],
        context: &MatchContext,
    ) -> GatewayResult<Vec<CrossModalMatch>> {
        let cache_key = Self::cache_key(&source.id, targets);
        if let Some(cached) = self.result_cache.get(&cache_key).await {
            debug!(source = %source.id, cached_at = cached.cached_at, "Cross-modal cache hit");
            return Ok(cached.matches.clone());
        }

        let mut matches = Vec::new();
        for target in targets {
            let direct = self.direct_matches(source, *target, context).await?;
            let sparse = direct.len() < SPARSE_THRESHOLD;
            matches.extend(direct);
            if sparse && self.config.enable_semantic_bridging && *target != ContentType::Text
            {
                matches.extend(self.bridged_matches(source, *target, context).await?);
            }
        }

        // Best score wins per content id
        let mut deduped: Vec<CrossModalMatch> = Vec::new();
        for candidate in matches {
            match deduped
                .iter_mut()
                .find(|m| m.content_id == candidate.content_id)
            {
                Some(existing) => {
                    if candidate.score > existing.score {
                        *existing = candidate;
                    }
                }
                None => deduped.push(candidate),
            }
        }
        deduped.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        deduped.truncate(self.config.max_matches_per_type * targets.len().max(1));

        self.result_cache
            .insert(
                cache_key,
                Arc::new(CachedMatches {
                    matches: deduped.clone(),
                    cached_at: chrono::Utc::now().timestamp_millis(),
                }),
            )
            .await;
        Ok(deduped)
    }

    async fn direct_matches(
        &self,
        source: &EmbeddingDocument,
        target: ContentType,
        context: &MatchContext,
    ) -> GatewayResult<Vec<CrossModalMatch>> {
        let hits = self
            .vector_store
            .search_by_content_type(
                &source.vector,
                target,
                &SimilarityOptions {
                    limit: self.config.max_matches_per_type,
                    threshold: self.config.similarity_threshold,
                    include_metadata: true,
                    include_vectors: false,
                },
            )
            .await?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.content_id != source.content_id)
            .filter_map(|hit| {
                let relevance = Self::contextual_relevance(context, hit.metadata.as_ref());
                if relevance < self.config.min_contextual_relevance {
                    return None;
                }
                let tags = Self::metadata_tags(hit.metadata.as_ref());
                Some(CrossModalMatch {
                    content_id: hit.content_id,
                    content_type: target,
                    score: hit.similarity * relevance,
                    relationship: Self::infer_relationship(
                        source.content_type,
                        target,
                        &tags,
                    ),
                    bridged: false,
                })
            })
            .collect())
    }

    /// Two-hop search: text bridge first, then the target modality
    /// from each bridge hit. Confidence is `s1 × s2 × 0.8`.
    async fn bridged_matches(
        &self,
        source: &EmbeddingDocument,
        target: ContentType,
        context: &MatchContext,
    ) -> GatewayResult<Vec<CrossModalMatch>> {
        let bridges = self
            .vector_store
            .search_by_content_type(
                &source.vector,
                ContentType::Text,
                &SimilarityOptions {
                    limit: BRIDGE_HITS,
                    threshold: self.config.similarity_threshold,
                    include_metadata: false,
                    include_vectors: true,
                },
            )
            .await?;

        let mut matches = Vec::new();
        for bridge in bridges {
            let Some(bridge_vector) = bridge.vector else {
                continue;
            };
            let second_hop = self
                .vector_store
                .search_by_content_type(
                    &bridge_vector,
                    target,
                    &SimilarityOptions {
                        limit: self.config.max_matches_per_type,
                        threshold: self.config.similarity_threshold,
                        include_metadata: true,
                        include_vectors: false,
                    },
                )
                .await?;
            for hit in second_hop {
                if hit.content_id == source.content_id {
                    continue;
                }
                let relevance = Self::contextual_relevance(context, hit.metadata.as_ref());
                if relevance < self.config.min_contextual_relevance {
                    continue;
                }
                let tags = Self::metadata_tags(hit.metadata.as_ref());
                matches.push(CrossModalMatch {
                    content_id: hit.content_id,
                    content_type: target,
                    score: bridge.similarity * hit.similarity * BRIDGE_DISCOUNT * relevance,
                    relationship: Self::infer_relationship(source.content_type, target, &tags),
                    bridged: true,
                });
            }
        }
        debug!(
            source = %source.id,
            target = %target,
            found = matches.len(),
            "Semantic bridging pass"
        );
        Ok(matches)
    }

    /// Contextual relevance in [0, 1]: tag overlap, source-path
    /// overlap and temporal proximity, averaged over the signals
    /// present on both sides. No shared signals means neutral 1.0.
    fn contextual_relevance(
        context: &MatchContext,
        metadata: Option<&serde_json::Value>,
    ) -> f64 {
        let mut components = Vec::new();

        let candidate_tags = Self::metadata_tags(metadata);
        if !context.tags.is_empty() && !candidate_tags.is_empty() {
            let own: HashSet<&str> = context.tags.iter().map(String::as_str).collect();
            let theirs: HashSet<&str> =
                candidate_tags.iter().map(String::as_str).collect();
            let shared = own.intersection(&theirs).count();
            let union = own.union(&theirs).count().max(1);
            #[allow(clippy::cast_precision_loss)]
            components.push(shared as f64 / union as f64);
        }

        let candidate_path = metadata
            .and_then(|m| m.get("sourcePath"))
            .and_then(|v| v.as_str());
        if let (Some(own_path), Some(their_path)) =
            (context.source_path.as_deref(), candidate_path)
        {
            let own: Vec<&str> = own_path.split('/').filter(|s| !s.is_empty()).collect();
            let theirs: Vec<&str> = their_path.split('/').filter(|s| !s.is_empty()).collect();
            let shared = own
                .iter()
                .zip(theirs.iter())
                .take_while(|(a, b)| a == b)
                .count();
            let longest = own.len().max(theirs.len()).max(1);
            #[allow(clippy::cast_precision_loss)]
            components.push(shared as f64 / longest as f64);
        }

        let candidate_ts = metadata
            .and_then(|m| m.get("timestamp"))
            .and_then(serde_json::Value::as_i64);
        if let (Some(own_ts), Some(their_ts)) = (context.timestamp_ms, candidate_ts) {
            #[allow(clippy::cast_precision_loss)]
            let distance = (own_ts - their_ts).abs() as f64;
            components.push((1.0 - distance / TEMPORAL_HORIZON_MS).clamp(0.0, 1.0));
        }

        if components.is_empty() {
            1.0
        } else {
            components.iter().sum::<f64>() / components.len() as f64
        }
    }

    fn metadata_tags(metadata: Option<&serde_json::Value>) -> Vec<String> {
        metadata
            .and_then(|m| m.get("tags"))
            .and_then(|v| v.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Relationship from the `(source → target)` table, with tag
    /// overrides promoting the label.
    #[must_use]
    pub fn infer_relationship(
        source: ContentType,
        target: ContentType,
        tags: &[String],
    ) -> RelationshipKind {
        for tag in tags {
            let tag = tag.to_lowercase();
            if tag.contains("example") {
                return RelationshipKind::ExampleOf;
            }
            if tag.contains("documentation") {
                return RelationshipKind::Documents;
            }
            if tag.contains("implementation") {
                return RelationshipKind::Implements;
            }
        }
        match (source, target) {
            (a, b) if a == b => RelationshipKind::SimilarTo,
            (ContentType::Text | ContentType::Document, ContentType::Image) => {
                RelationshipKind::Illustrates
            }
            (ContentType::Image, ContentType::Text | ContentType::Document) => {
                RelationshipKind::Describes
            }
            (ContentType::Text | ContentType::Document, ContentType::Code) => {
                RelationshipKind::Implements
            }
            (ContentType::Code, ContentType::Text | ContentType::Document) => {
                RelationshipKind::Documents
            }
            (ContentType::Audio, _) | (_, ContentType::Audio) => {
                RelationshipKind::TranscriptOf
            }
            _ => RelationshipKind::RelatedTo,
        }
    }

    fn cache_key(source_id: &str, targets: &[ContentType]) -> String {
        let mut key = source_id.to_string();
        for target in targets {
            key.push(':');
            key.push_str(target.as_str());
        }
        key
    }

    /// Matcher statistics
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "island": "cross_modal",
            "cached_result_sets": self.result_cache.entry_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_table() {
        assert_eq!(
            CrossModalMatcher::infer_relationship(ContentType::Text, ContentType::Image, &[]),
            RelationshipKind::Illustrates
        );
        assert_eq!(
            CrossModalMatcher::infer_relationship(ContentType::Code, ContentType::Text, &[]),
            RelationshipKind::Documents
        );
        assert_eq!(
            CrossModalMatcher::infer_relationship(ContentType::Code, ContentType::Code, &[]),
            RelationshipKind::SimilarTo
        );
    }

    #[test]
    fn test_tag_overrides_promote_label() {
        let tags = vec!["usage-example".to_string()];
        assert_eq!(
            CrossModalMatcher::infer_relationship(ContentType::Text, ContentType::Image, &tags),
            RelationshipKind::ExampleOf
        );
        let tags = vec!["documentation".to_string()];
        assert_eq!(
            CrossModalMatcher::infer_relationship(ContentType::Image, ContentType::Text, &tags),
            RelationshipKind::Documents
        );
    }

    #[test]
    fn test_contextual_relevance_components() {
        let context = MatchContext {
            tags: vec!["rust".to_string(), "parser".to_string()],
            source_path: Some("src/parser/mod.rs".to_string()),
            timestamp_ms: Some(1_000_000),
        };
        let metadata = serde_json::json!({
            "tags": ["rust", "lexer"],
            "sourcePath": "src/parser/lexer.rs",
            "timestamp": 1_000_000
        });
        let relevance = CrossModalMatcher::contextual_relevance(&context, Some(&metadata));
        assert!(relevance > 0.3 && relevance <= 1.0);

        // No shared signals stays neutral
        let neutral = CrossModalMatcher::contextual_relevance(
            &MatchContext::default(),
            Some(&serde_json::json!({})),
        );
        assert!((neutral - 1.0).abs() < f64::EPSILON);
    }
}
