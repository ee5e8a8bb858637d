//! Request Analyzer Component
//!
//! Pure classification of a request in its context: complexity,
//! token estimate, required capabilities, urgency, resource demand
//! and quality targets. Pattern tables are compiled once at
//! construction; analysis itself holds no state.

use regex::Regex;

use super::types::{
    AiRequest, Band, PriorityBand, QualityRequirements, RequestAnalysis, RequestType,
};

/// Hard cap on estimated tokens
const MAX_ESTIMATED_TOKENS: u64 = 32_768;
/// History contribution cap
const MAX_HISTORY_TOKENS: u64 = 4_096;
/// Fixed prompt scaffolding allowance
const OVERHEAD_TOKENS: u64 = 64;

/// Technical vocabulary that signals complexity
const TECHNICAL_TERMS: [&str; 16] = [
    "api",
    "algorithm",
    "async",
    "cache",
    "compiler",
    "concurrency",
    "database",
    "encryption",
    "kernel",
    "latency",
    "protocol",
    "query",
    "runtime",
    "schema",
    "thread",
    "vector",
];

/// Request Analyzer
pub struct RequestAnalyzer {
    complexity_patterns: Vec<(Regex, f64)>,
    urgency_patterns: Vec<(Regex, f64)>,
    code_language_pattern: Regex,
    creative_cue: Regex,
    factual_cue: Regex,
}

impl Default for RequestAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestAnalyzer {
    /// Compile the pattern tables
    ///
    /// # Panics
    ///
    /// Never at runtime; the patterns are literals validated by tests.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn new() -> Self {
        let complexity_patterns = vec![
            (Regex::new(r"(?i)complex|advanced|sophisticated").unwrap(), 2.0),
            (Regex::new(r"(?i)simple|basic|quick").unwrap(), -1.0),
            (Regex::new(r"(?i)step.by.step|detailed|thorough").unwrap(), 1.0),
            (Regex::new(r"(?i)optimi[sz]e|refactor|architecture").unwrap(), 1.0),
        ];
        let urgency_patterns = vec![
            (Regex::new(r"(?i)emergency").unwrap(), 3.0),
            (Regex::new(r"(?i)urgent|asap|immediately").unwrap(), 2.0),
            (Regex::new(r"(?i)deadline|soon").unwrap(), 1.0),
        ];
        Self {
            complexity_patterns,
            urgency_patterns,
            code_language_pattern: Regex::new(
                r"(?i)\b(python|rust|javascript|typescript|java|golang|sql|c\+\+)\b",
            )
            .unwrap(),
            creative_cue: Regex::new(r"(?i)creative|story|imagine|poem").unwrap(),
            factual_cue: Regex::new(r"(?i)fact|accurate|precise|cite").unwrap(),
        }
    }

    /// Classify a request; pure over the request and its context
    #[must_use]
    pub fn analyze(&self, request: &AiRequest) -> RequestAnalysis {
        let complexity_score = self.complexity_score(request);
        let complexity = Self::band(complexity_score, 3.0, 6.0);
        let estimated_tokens = Self::estimate_tokens(request);
        let required_capabilities = self.required_capabilities(request);
        let urgency_score = self.urgency_score(request);
        let urgency = Self::band(urgency_score, 2.0, 4.0);
        let context_size = request
            .context
            .as_ref()
            .map_or(0, |c| c.conversation_history.iter().map(String::len).sum());

        let resource_demand = if complexity == Band::High || estimated_tokens > 8_192 {
            Band::High
        } else if complexity == Band::Medium || estimated_tokens > 2_048 {
            Band::Medium
        } else {
            Band::Low
        };

        let expected_latency_ms = Self::expected_latency(complexity, estimated_tokens);
        let quality = self.quality_requirements(request);
        let preferred_providers = request
            .context
            .as_ref()
            .map(|c| c.preferred_providers.clone())
            .unwrap_or_default();

        RequestAnalysis {
            complexity,
            complexity_score,
            estimated_tokens,
            required_capabilities,
            preferred_providers,
            urgency,
            urgency_score,
            resource_demand,
            context_size,
            expected_latency_ms,
            quality,
        }
    }

    fn band(score: f64, medium_at: f64, high_at: f64) -> Band {
        if score >= high_at {
            Band::High
        } else if score >= medium_at {
            Band::Medium
        } else {
            Band::Low
        }
    }

    fn complexity_score(&self, request: &AiRequest) -> f64 {
        let base = match request.request_type {
            RequestType::CodeGeneration | RequestType::ImageAnalysis => 3.0,
            RequestType::TextGeneration
            | RequestType::AudioTranscription
            | RequestType::Translation
            | RequestType::Summarization
            | RequestType::QuestionAnswering => 2.0,
        };

        let length_bonus = if request.content.len() > 5_000 {
            2.0
        } else if request.content.len() > 1_000 {
            1.0
        } else {
            0.0
        };

        let pattern_bonus: f64 = self
            .complexity_patterns
            .iter()
            .filter(|(pattern, _)| pattern.is_match(&request.content))
            .map(|(_, bonus)| bonus)
            .sum();

        let density_bonus = Self::technical_density_bonus(&request.content);

        (base + length_bonus + pattern_bonus + density_bonus).max(0.0)
    }

    /// Up to +2 from the density of technical vocabulary
    #[allow(clippy::cast_precision_loss)]
    fn technical_density_bonus(content: &str) -> f64 {
        let lower = content.to_lowercase();
        let words = lower.split_whitespace().count().max(1);
        let hits = TECHNICAL_TERMS
            .iter()
            .filter(|term| lower.contains(*term))
            .count();
        (hits as f64 / words as f64 * 10.0).min(2.0)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn estimate_tokens(request: &AiRequest) -> u64 {
        let content_tokens = (request.content.len() / 4) as u64;
        let history_tokens = request
            .context
            .as_ref()
            .map(|c| {
                let chars: usize = c.conversation_history.iter().map(String::len).sum();
                ((chars / 4) as u64).min(MAX_HISTORY_TOKENS)
            })
            .unwrap_or(0);
        (content_tokens + history_tokens + OVERHEAD_TOKENS).min(MAX_ESTIMATED_TOKENS)
    }

    fn required_capabilities(&self, request: &AiRequest) -> Vec<String> {
        let mut capabilities = vec![request.request_type.as_str().to_string()];
        capabilities.extend(request.metadata.required_capabilities.iter().cloned());

        for capture in self.code_language_pattern.captures_iter(&request.content) {
            if let Some(lang) = capture.get(1) {
                let lang = lang.as_str().to_lowercase();
                if !capabilities.contains(&lang) {
                    capabilities.push(lang);
                }
            }
        }
        if request.content.contains("```")
            && request.request_type != RequestType::CodeGeneration
        {
            let code = RequestType::CodeGeneration.as_str().to_string();
            if !capabilities.contains(&code) {
                capabilities.push(code);
            }
        }
        if request.content.chars().any(|c| !c.is_ascii()) {
            capabilities.push("multilingual".to_string());
        }
        capabilities
    }

    fn urgency_score(&self, request: &AiRequest) -> f64 {
        let mut score = match request.metadata.priority {
            PriorityBand::High => 3.0,
            PriorityBand::Medium => 1.0,
            PriorityBand::Low => 0.0,
        };

        let max_latency = request.metadata.max_latency_ms.or_else(|| {
            request
                .context
                .as_ref()
                .and_then(|c| c.time_constraints.as_ref())
                .and_then(|t| t.max_latency_ms)
        });
        match max_latency {
            Some(ms) if ms < 1_000 => score += 2.0,
            Some(ms) if ms < 5_000 => score += 1.0,
            _ => {}
        }
        let deadline_soon = request
            .context
            .as_ref()
            .and_then(|c| c.time_constraints.as_ref())
            .and_then(|t| t.deadline_ms)
            .is_some_and(|at| at - chrono::Utc::now().timestamp_millis() < 60_000);
        if deadline_soon {
            score += 2.0;
        }

        score += self
            .urgency_patterns
            .iter()
            .filter(|(pattern, _)| pattern.is_match(&request.content))
            .map(|(_, bonus)| bonus)
            .sum::<f64>();
        score
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn expected_latency(complexity: Band, estimated_tokens: u64) -> u64 {
        let base = match complexity {
            Band::Low => 800,
            Band::Medium => 2_000,
            Band::High => 5_000,
        };
        base + estimated_tokens / 1_000 * 200
    }

    fn quality_requirements(&self, request: &AiRequest) -> QualityRequirements {
        let mut quality = match request.request_type {
            RequestType::TextGeneration => QualityRequirements {
                accuracy: 0.7,
                creativity: 0.8,
                factuality: 0.6,
            },
            RequestType::CodeGeneration => QualityRequirements {
                accuracy: 0.9,
                creativity: 0.3,
                factuality: 0.9,
            },
            RequestType::ImageAnalysis => QualityRequirements {
                accuracy: 0.85,
                creativity: 0.3,
                factuality: 0.85,
            },
            RequestType::AudioTranscription => QualityRequirements {
                accuracy: 0.9,
                creativity: 0.2,
                factuality: 0.9,
            },
            RequestType::Translation => QualityRequirements {
                accuracy: 0.9,
                creativity: 0.3,
                factuality: 0.9,
            },
            RequestType::Summarization => QualityRequirements {
                accuracy: 0.8,
                creativity: 0.4,
                factuality: 0.9,
            },
            RequestType::QuestionAnswering => QualityRequirements {
                accuracy: 0.9,
                creativity: 0.2,
                factuality: 0.95,
            },
        };

        if self.creative_cue.is_match(&request.content) {
            quality.creativity = (quality.creativity + 0.2).min(1.0);
            quality.factuality = (quality.factuality - 0.1).max(0.0);
        }
        if self.factual_cue.is_match(&request.content) {
            quality.accuracy = (quality.accuracy + 0.1).min(1.0);
            quality.factuality = (quality.factuality + 0.15).min(1.0);
            quality.creativity = (quality.creativity - 0.2).max(0.0);
        }
        quality
    }
}
