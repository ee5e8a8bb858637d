//! Routing Data Model
//!
//! Requests, endpoint descriptors, analyses and routing decisions.
//! Requests are immutable after creation; endpoint performance is the
//! only mutable surface and it changes through the registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// AI request kinds the gateway routes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestType {
    TextGeneration,
    CodeGeneration,
    ImageAnalysis,
    AudioTranscription,
    Translation,
    Summarization,
    QuestionAnswering,
}

impl RequestType {
    pub const ALL: [RequestType; 7] = [
        RequestType::TextGeneration,
        RequestType::CodeGeneration,
        RequestType::ImageAnalysis,
        RequestType::AudioTranscription,
        RequestType::Translation,
        RequestType::Summarization,
        RequestType::QuestionAnswering,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextGeneration => "text-generation",
            Self::CodeGeneration => "code-generation",
            Self::ImageAnalysis => "image-analysis",
            Self::AudioTranscription => "audio-transcription",
            Self::Translation => "translation",
            Self::Summarization => "summarization",
            Self::QuestionAnswering => "question-answering",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority bands on request metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityBand {
    Low,
    Medium,
    High,
}

/// Caller-supplied deadline hints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeConstraints {
    /// Absolute deadline, epoch ms
    pub deadline_ms: Option<i64>,
    pub max_latency_ms: Option<u64>,
}

/// Conversation and workspace context accompanying a request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<String>,
    pub workspace: Option<String>,
    #[serde(default)]
    pub previous_request_ids: Vec<String>,
    pub time_constraints: Option<TimeConstraints>,
    /// Providers the caller would rather route to
    #[serde(default)]
    pub preferred_providers: Vec<String>,
}

/// Request metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub priority: PriorityBand,
    pub max_latency_ms: Option<u64>,
    pub max_cost: Option<f64>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Submission time, epoch ms
    pub timestamp: i64,
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self {
            priority: PriorityBand::Medium,
            max_latency_ms: None,
            max_cost: None,
            required_capabilities: Vec::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// An AI request; immutable once built
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRequest {
    pub id: String,
    pub content: String,
    pub request_type: RequestType,
    pub context: Option<RequestContext>,
    pub metadata: RequestMetadata,
}

impl AiRequest {
    /// Build a request with default metadata and a hash-derived id
    #[must_use]
    pub fn new(content: impl Into<String>, request_type: RequestType) -> Self {
        let content = content.into();
        let id = blake3::hash(content.as_bytes()).to_hex()[..16].to_string();
        Self {
            id,
            content,
            request_type,
            context: None,
            metadata: RequestMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Per-1k-token pricing for an endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    pub currency: String,
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self {
            input_per_1k: 0.0,
            output_per_1k: 0.0,
            currency: "USD".to_string(),
        }
    }
}

/// One capability claim of an endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCapability {
    pub request_type: RequestType,
    pub max_tokens: u64,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub specializations: Vec<String>,
    /// Heuristic quality in [0, 1]
    pub quality: f64,
}

/// Operational constraints of an endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConstraints {
    pub max_concurrent: Option<u32>,
    pub requests_per_minute: Option<u32>,
    pub max_payload_bytes: Option<u64>,
    #[serde(default)]
    pub required_headers: HashMap<String, String>,
    #[serde(default)]
    pub formats: Vec<String>,
}

/// Rolling performance attached to an endpoint; refreshed from live
/// telemetry through the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub avg_latency_ms: f64,
    pub throughput_rps: f64,
    pub accuracy: f64,
    pub availability: f64,
    pub error_rate: f64,
}

impl Default for ModelPerformance {
    fn default() -> Self {
        Self {
            avg_latency_ms: 1_000.0,
            throughput_rps: 1.0,
            accuracy: 0.8,
            availability: 1.0,
            error_rate: 0.0,
        }
    }
}

/// A registered model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpoint {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub url: String,
    #[serde(default)]
    pub pricing: ModelPricing,
    pub capabilities: Vec<ModelCapability>,
    #[serde(default)]
    pub constraints: ModelConstraints,
    #[serde(default)]
    pub performance: ModelPerformance,
    /// Routing priority in [0, 100]
    pub priority: u8,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ModelEndpoint {
    /// Capability matching a request type, when claimed
    #[must_use]
    pub fn capability_for(&self, request_type: RequestType) -> Option<&ModelCapability> {
        self.capabilities
            .iter()
            .find(|cap| cap.request_type == request_type)
    }

    /// Cost of a request in endpoint currency
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost_for(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        prompt_tokens as f64 / 1_000.0 * self.pricing.input_per_1k
            + completion_tokens as f64 / 1_000.0 * self.pricing.output_per_1k
    }
}

/// Hard requirements used by registry candidate filtering
#[derive(Debug, Clone, Default)]
pub struct ModelRequirements {
    pub max_latency_ms: Option<f64>,
    pub min_accuracy: Option<f64>,
    pub max_input_cost_per_1k: Option<f64>,
    pub required_capabilities: Vec<String>,
    pub excluded_providers: Vec<String>,
}

/// Bands used by the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Low,
    Medium,
    High,
}

/// Quality targets for a request
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityRequirements {
    pub accuracy: f64,
    pub creativity: f64,
    pub factuality: f64,
}

/// Derived classification of a request in its context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAnalysis {
    pub complexity: Band,
    pub complexity_score: f64,
    pub estimated_tokens: u64,
    pub required_capabilities: Vec<String>,
    pub preferred_providers: Vec<String>,
    pub urgency: Band,
    pub urgency_score: f64,
    pub resource_demand: Band,
    pub context_size: usize,
    pub expected_latency_ms: u64,
    pub quality: QualityRequirements,
}

/// Fallback strategies attached to a routing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackStrategy {
    Retry,
    Alternative,
    Queue,
}

/// Outcome of `Route`: the selected endpoint plus ordered alternatives
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub selected: ModelEndpoint,
    /// Up to three distinct, active alternatives
    pub alternatives: Vec<ModelEndpoint>,
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub estimated_latency_ms: f64,
    pub estimated_cost: f64,
    pub fallback: FallbackStrategy,
}

/// Final result of an executed request
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub request_id: String,
    pub model_id: String,
    pub content: String,
    pub latency_ms: f64,
    pub cost: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// True when served from the semantic cache
    pub from_cache: bool,
    /// Similarity of the cache hit, when applicable
    pub cache_similarity: Option<f64>,
}
