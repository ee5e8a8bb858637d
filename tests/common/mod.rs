//! Shared test harness: in-process store, deterministic embedder and
//! a scripted provider invoker.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis_ai_gateway::service_islands::layer2_external_services::embedding_island::Embedder;
use redis_ai_gateway::service_islands::layer2_external_services::model_provider_island::{
    EndpointTarget, ModelInvoker, ProviderRequest, ProviderResponse, Usage,
};
use redis_ai_gateway::service_islands::layer5_business_logic::model_routing_island::types::{
    ModelCapability, ModelConstraints, ModelEndpoint, ModelPerformance, ModelPricing,
    RequestType,
};
use redis_ai_gateway::service_islands::layer5_business_logic::shared::error::{
    GatewayError, GatewayResult,
};

/// Deterministic embedder: explicit vectors for registered texts,
/// hash-derived unit vectors otherwise.
pub struct StubEmbedder {
    dimension: usize,
    fixed: Mutex<HashMap<String, Vec<f32>>>,
    calls: AtomicU64,
}

impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixed: Mutex::new(HashMap::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Pin the vector returned for a text. Register the *normalized*
    /// form when the cache under test normalizes queries.
    pub fn register(&self, text: &str, vector: Vec<f32>) {
        assert_eq!(vector.len(), self.dimension, "vector dimension mismatch");
        self.fixed.lock().insert(text.to_string(), vector);
    }

    pub fn embed_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn derive(&self, text: &str) -> Vec<f32> {
        let digest = blake3::hash(text.as_bytes());
        let bytes = digest.as_bytes();
        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|i| {
                let b = bytes[i % bytes.len()];
                f32::from(b) / 255.0 * 2.0 - 1.0
            })
            .collect();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
        for component in &mut vector {
            *component /= norm;
        }
        vector
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str, _tags: Option<&[String]>) -> GatewayResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fixed = self.fixed.lock().get(text).cloned();
        Ok(fixed.unwrap_or_else(|| self.derive(text)))
    }
}

/// Scripted provider: per-endpoint failure switches, call accounting,
/// optional artificial latency.
pub struct ScriptedInvoker {
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self {
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn fail_endpoint(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    pub fn recover_endpoint(&self, id: &str) {
        self.failing.lock().remove(id);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        endpoint: &EndpointTarget,
        request: &ProviderRequest,
        _deadline: Option<Duration>,
    ) -> GatewayResult<ProviderResponse> {
        self.calls.lock().push(endpoint.id.clone());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(&endpoint.id) {
            return Err(GatewayError::Provider(format!(
                "{} returned 502: scripted failure",
                endpoint.id
            )));
        }
        Ok(ProviderResponse {
            id: format!("resp-{}", request.id),
            content: format!("answer from {} to: {}", endpoint.id, request.content),
            model: endpoint.id.clone(),
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        })
    }
}

/// A registered endpoint with sensible defaults for tests
pub fn test_endpoint(
    id: &str,
    request_type: RequestType,
    priority: u8,
    quality: f64,
) -> ModelEndpoint {
    let now = chrono::Utc::now().timestamp_millis();
    ModelEndpoint {
        id: id.to_string(),
        name: format!("model {id}"),
        provider: format!("{id}-provider"),
        url: format!("https://models.example/{id}"),
        pricing: ModelPricing {
            input_per_1k: 0.01,
            output_per_1k: 0.02,
            currency: "USD".to_string(),
        },
        capabilities: vec![ModelCapability {
            request_type,
            max_tokens: 32_768,
            languages: vec!["en".to_string()],
            specializations: vec![],
            quality,
        }],
        constraints: ModelConstraints::default(),
        performance: ModelPerformance::default(),
        priority,
        active: true,
        created_at: now,
        updated_at: now,
    }
}

/// Opt-in tracing output for debugging test runs (`RUST_LOG=debug`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Embedding dimension shared by the test fixtures
pub const TEST_DIM: usize = 16;

/// Unit vector pair with the requested cosine similarity
pub fn vectors_with_similarity(cos: f32) -> (Vec<f32>, Vec<f32>) {
    let mut a = vec![0.0; TEST_DIM];
    let mut b = vec![0.0; TEST_DIM];
    a[0] = 1.0;
    b[0] = cos;
    b[1] = (1.0 - cos * cos).sqrt();
    (a, b)
}

/// Unit basis vector along the given axis
pub fn basis_vector(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; TEST_DIM];
    v[axis % TEST_DIM] = 1.0;
    v
}
