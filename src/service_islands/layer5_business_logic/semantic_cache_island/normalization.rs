//! Query Normalization
//!
//! Canonical form for queries before hashing and embedding, so
//! trivially-different phrasings share a cache identity. Normalization
//! is idempotent: applying it twice yields the first result.

use std::collections::{HashMap, HashSet};

use crate::service_islands::layer5_business_logic::model_routing_island::types::RequestType;

/// Stop words removed from question-answering queries
const QA_STOP_WORDS: [&str; 18] = [
    "a", "an", "the", "is", "are", "was", "were", "what", "which", "who", "whom", "this",
    "that", "to", "of", "in", "on", "for",
];

/// Code-term synonyms folded together for code-generation queries.
/// Targets are never sources, which keeps replacement idempotent.
const CODE_SYNONYMS: [(&str, &str); 6] = [
    ("javascript", "js"),
    ("typescript", "ts"),
    ("golang", "go"),
    ("rustlang", "rust"),
    ("kubernetes", "k8s"),
    ("postgresql", "postgres"),
];

/// Query normalizer and cache-key builder
pub struct QueryNormalizer {
    enabled: bool,
    cache_by_model: bool,
    stop_words: HashSet<&'static str>,
    code_synonyms: HashMap<&'static str, &'static str>,
}

impl QueryNormalizer {
    #[must_use]
    pub fn new(enabled: bool, cache_by_model: bool) -> Self {
        Self {
            enabled,
            cache_by_model,
            stop_words: QA_STOP_WORDS.into_iter().collect(),
            code_synonyms: CODE_SYNONYMS.into_iter().collect(),
        }
    }

    /// Canonicalize a query for its request type
    #[must_use]
    pub fn normalize(&self, query: &str, request_type: RequestType) -> String {
        if !self.enabled {
            return query.to_string();
        }
        let lowered = query.trim().to_lowercase();
        let stripped: String = lowered
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c
                } else {
                    ' '
                }
            })
            .collect();

        let words = stripped.split_whitespace().filter(|word| {
            request_type != RequestType::QuestionAnswering || !self.stop_words.contains(word)
        });
        let words: Vec<&str> = if request_type == RequestType::CodeGeneration {
            words
                .map(|word| self.code_synonyms.get(word).copied().unwrap_or(word))
                .collect()
        } else {
            words.collect()
        };
        words.join(" ")
    }

    /// Compose the cache key: `[model:]normalized[:ctx…]` with context
    /// keys appended in deterministic sorted order.
    #[must_use]
    pub fn cache_key(
        &self,
        normalized: &str,
        model: Option<&str>,
        context_keys: &[String],
    ) -> String {
        let mut key = String::new();
        if self.cache_by_model {
            if let Some(model) = model {
                key.push_str(model);
                key.push(':');
            }
        }
        key.push_str(normalized);
        let mut sorted: Vec<&String> = context_keys.iter().collect();
        sorted.sort();
        for context in sorted {
            key.push(':');
            key.push_str(context);
        }
        key
    }

    /// Stable hash of a cache key
    #[must_use]
    pub fn hash_key(key: &str) -> String {
        blake3::hash(key.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> QueryNormalizer {
        QueryNormalizer::new(true, false)
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let n = normalizer();
        for (query, request_type) in [
            ("  What is   the Capital of France?! ", RequestType::QuestionAnswering),
            ("Write a JavaScript parser, please!", RequestType::CodeGeneration),
            ("Summarize: THIS REPORT...", RequestType::Summarization),
        ] {
            let once = n.normalize(query, request_type);
            let twice = n.normalize(&once, request_type);
            assert_eq!(once, twice, "not idempotent for {query:?}");
        }
    }

    #[test]
    fn test_qa_stop_words_removed() {
        let n = normalizer();
        let normalized = n.normalize("What is the capital of France", RequestType::QuestionAnswering);
        assert_eq!(normalized, "capital france");
    }

    #[test]
    fn test_code_synonyms_fold() {
        let n = normalizer();
        let normalized = n.normalize(
            "Convert this TypeScript service to Golang",
            RequestType::CodeGeneration,
        );
        assert_eq!(normalized, "convert this ts service to go");
    }

    #[test]
    fn test_stop_words_left_alone_outside_qa() {
        let n = normalizer();
        let normalized = n.normalize("What is the point", RequestType::TextGeneration);
        assert_eq!(normalized, "what is the point");
    }

    #[test]
    fn test_cache_key_composition() {
        let n = QueryNormalizer::new(true, true);
        let key = n.cache_key(
            "capital france",
            Some("gpt-fast"),
            &["sess:2".to_string(), "sess:1".to_string()],
        );
        assert_eq!(key, "gpt-fast:capital france:sess:1:sess:2");

        let without_model = QueryNormalizer::new(true, false);
        let key = without_model.cache_key("capital france", Some("gpt-fast"), &[]);
        assert_eq!(key, "capital france");
    }

    #[test]
    fn test_disabled_normalization_passes_through() {
        let n = QueryNormalizer::new(false, false);
        assert_eq!(
            n.normalize("  Mixed CASE?  ", RequestType::QuestionAnswering),
            "  Mixed CASE?  "
        );
    }
}
