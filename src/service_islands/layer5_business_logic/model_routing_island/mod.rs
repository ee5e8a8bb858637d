//! Model Routing Island
//!
//! Chooses a model endpoint for each request from live telemetry,
//! capability claims and circuit-breaker state, then executes with
//! retries and failover. The full request path consults the semantic
//! cache first and writes fresh answers back on the way out.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::service_islands::layer1_infrastructure::app_config::RouterConfig;
use crate::service_islands::layer2_external_services::model_provider_island::{
    circuit_breaker::{CircuitBreaker, CircuitState},
    EndpointTarget, ModelInvoker, ProviderRequest,
};
use crate::service_islands::layer4_observability::performance_island::{
    timeseries::Window, PerformanceMonitorIsland,
};
use crate::service_islands::layer5_business_logic::semantic_cache_island::{
    CacheEntryMetadata, SemanticCache,
};
use crate::service_islands::layer5_business_logic::shared::error::{
    GatewayError, GatewayResult,
};

pub mod model_registry;
pub mod request_analyzer;
pub mod types;

use model_registry::ModelRegistry;
use request_analyzer::RequestAnalyzer;
use types::{
    AiRequest, FallbackStrategy, ModelEndpoint, ModelRequirements, RequestAnalysis,
    RoutedResponse, RoutingDecision,
};

/// Throughput considered saturated for scoring purposes
const THROUGHPUT_NORM_RPS: f64 = 10.0;
/// Alternatives packed into a decision
const MAX_ALTERNATIVES: usize = 3;
/// Score boost for providers the caller prefers
const USER_PREFERENCE_BOOST: f64 = 0.05;
/// Strength of the inverse-usage load balancing perturbation
const LOAD_BALANCE_WEIGHT: f64 = 0.05;

/// Model Routing Engine
pub struct RoutingEngine {
    config: RouterConfig,
    registry: Arc<ModelRegistry>,
    analyzer: Arc<RequestAnalyzer>,
    monitor: Arc<PerformanceMonitorIsland>,
    breakers: Arc<CircuitBreaker>,
    invoker: Arc<dyn ModelInvoker>,
    semantic_cache: Option<Arc<SemanticCache>>,
    usage_counts: DashMap<String, u64>,
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    // Counters
    routed: AtomicU64,
    executed: AtomicU64,
    cache_hits: AtomicU64,
    failovers: AtomicU64,
    exhausted: AtomicU64,
}

impl RoutingEngine {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RouterConfig,
        registry: Arc<ModelRegistry>,
        analyzer: Arc<RequestAnalyzer>,
        monitor: Arc<PerformanceMonitorIsland>,
        breakers: Arc<CircuitBreaker>,
        invoker: Arc<dyn ModelInvoker>,
        semantic_cache: Option<Arc<SemanticCache>>,
    ) -> Self {
        Self {
            config,
            registry,
            analyzer,
            monitor,
            breakers,
            invoker,
            semantic_cache,
            usage_counts: DashMap::new(),
            inflight: DashMap::new(),
            routed: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
        }
    }

    /// Analyze a request and choose an endpoint plus alternatives
    ///
    /// # Errors
    ///
    /// `NoCandidates` when no active, capable endpoint with a
    /// non-open breaker exists for the request type.
    pub fn route(&self, request: &AiRequest) -> GatewayResult<RoutingDecision> {
        self.routed.fetch_add(1, Ordering::Relaxed);
        let analysis = self.analyzer.analyze(request);

        let requirements = ModelRequirements {
            max_latency_ms: request.metadata.max_latency_ms.map(|ms| ms as f64 * 2.0),
            min_accuracy: None,
            max_input_cost_per_1k: None,
            required_capabilities: request.metadata.required_capabilities.clone(),
            excluded_providers: Vec::new(),
        };
        let candidates: Vec<ModelEndpoint> = self
            .registry
            .find_best(request.request_type, &requirements)
            .into_iter()
            .filter(|endpoint| {
                endpoint
                    .capability_for(request.request_type)
                    .is_some_and(|cap| cap.max_tokens >= analysis.estimated_tokens)
            })
            .filter(|endpoint| self.breakers.state(&endpoint.id) != CircuitState::Open)
            .collect();
        if candidates.is_empty() {
            return Err(GatewayError::NoCandidates(format!(
                "no active capable endpoint for {}",
                request.request_type
            )));
        }

        let mut reasoning = vec![
            format!(
                "analysis: complexity={:?} tokens={} urgency={:?}",
                analysis.complexity, analysis.estimated_tokens, analysis.urgency
            ),
            format!("candidates after filtering: {}", candidates.len()),
        ];

        let mut scored: Vec<(f64, f64, ModelEndpoint)> = candidates
            .into_iter()
            .map(|endpoint| {
                let base = self.score_candidate(&endpoint, request, &analysis);
                let effective = if self.config.enable_load_balancing {
                    // Sub-epsilon jitter randomizes ties without
                    // disturbing real score differences
                    let jitter = (rand::random::<f64>() - 0.5) * 1e-9;
                    base - self.usage_pressure(&endpoint.id) + jitter
                } else {
                    base
                };
                (effective, base, endpoint)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        // A half-open breaker admits one trial request; prefer it so
        // a recovered endpoint can actually close its circuit.
        if let Some(position) = scored
            .iter()
            .position(|(_, _, e)| self.breakers.state(&e.id) == CircuitState::HalfOpen)
        {
            if position > 0 {
                let probe = scored.remove(position);
                reasoning.push(format!("probing half-open endpoint {}", probe.2.id));
                scored.insert(0, probe);
            }
        }

        let (_, top_base, mut selected) = scored.remove(0);
        let mut alternatives: Vec<ModelEndpoint> = scored
            .iter()
            .take(MAX_ALTERNATIVES)
            .map(|(_, _, e)| e.clone())
            .collect();

        // The candidate filter already drops open breakers; this guards
        // against one opening between filtering and selection.
        if self.breakers.state(&selected.id) == CircuitState::Open {
            let replacement = alternatives
                .iter()
                .position(|alt| self.breakers.state(&alt.id) != CircuitState::Open);
            match replacement {
                Some(index) => {
                    reasoning.push(format!(
                        "breaker open on {}, swapped in alternative",
                        selected.id
                    ));
                    selected = alternatives.remove(index);
                }
                None => {
                    return Err(GatewayError::NoCandidates(
                        "all candidate breakers are open".to_string(),
                    ))
                }
            }
        }

        let runner_up = scored.first().map_or(0.0, |(_, base, _)| *base);
        let mut confidence = top_base.clamp(0.0, 1.0);
        if !scored.is_empty() && (top_base - runner_up).abs() < 0.05 {
            confidence *= 0.8;
        }
        reasoning.push(format!(
            "selected {} (score {:.3}, confidence {:.2})",
            selected.id, top_base, confidence
        ));

        let live_latency = self
            .monitor
            .get_model_performance(&selected.id, Window::FiveMinutes)
            .map_or(selected.performance.avg_latency_ms, |s| s.avg_latency_ms);
        let estimated_cost = Self::estimate_cost(&selected, &analysis);

        let fallback = if self.config.enable_failover && !alternatives.is_empty() {
            FallbackStrategy::Alternative
        } else if self.config.max_retries > 0 {
            FallbackStrategy::Retry
        } else {
            FallbackStrategy::Queue
        };

        debug!(
            request = %request.id,
            selected = %selected.id,
            alternatives = alternatives.len(),
            "Routing decision made"
        );
        Ok(RoutingDecision {
            selected,
            alternatives,
            confidence,
            reasoning,
            estimated_latency_ms: live_latency,
            estimated_cost,
            fallback,
        })
    }

    /// Weighted candidate score: performance, cost, quality,
    /// availability, plus the user-preference boost.
    fn score_candidate(
        &self,
        endpoint: &ModelEndpoint,
        request: &AiRequest,
        analysis: &RequestAnalysis,
    ) -> f64 {
        let weights = self.config.effective_weights();
        let live = self
            .monitor
            .get_model_performance(&endpoint.id, Window::FiveMinutes);
        let (latency, throughput, error_rate, availability, _accuracy) = match &live {
            Some(stats) => (
                stats.avg_latency_ms,
                stats.throughput_rps,
                stats.error_rate,
                stats.availability,
                stats.accuracy,
            ),
            None => (
                endpoint.performance.avg_latency_ms,
                endpoint.performance.throughput_rps,
                endpoint.performance.error_rate,
                endpoint.performance.availability,
                endpoint.performance.accuracy,
            ),
        };

        let latency_ratio =
            (analysis.expected_latency_ms as f64 / latency.max(1.0)).min(1.0);
        let throughput_score = (throughput / THROUGHPUT_NORM_RPS).clamp(0.0, 1.0);
        let perf_score = (latency_ratio + throughput_score + (1.0 - error_rate)) / 3.0;

        let cost_score = if self.config.cost_optimization {
            let estimated = Self::estimate_cost(endpoint, analysis);
            let budget = request.metadata.max_cost.unwrap_or(0.1).max(1e-6);
            (1.0 - estimated / budget).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let quality_score = endpoint
            .capability_for(request.request_type)
            .map_or(0.0, |cap| cap.quality);

        let preference_boost = if analysis
            .preferred_providers
            .iter()
            .any(|p| p == &endpoint.provider)
        {
            USER_PREFERENCE_BOOST
        } else {
            0.0
        };

        weights.performance * perf_score
            + weights.cost * cost_score
            + weights.quality * quality_score
            + weights.availability * availability
            + preference_boost
    }

    /// Inverse-usage perturbation for load balancing
    #[allow(clippy::cast_precision_loss)]
    fn usage_pressure(&self, endpoint_id: &str) -> f64 {
        let own = self
            .usage_counts
            .get(endpoint_id)
            .map_or(0, |count| *count);
        let total: u64 = self.usage_counts.iter().map(|entry| *entry.value()).sum();
        if total == 0 {
            return 0.0;
        }
        own as f64 / total as f64 * LOAD_BALANCE_WEIGHT
    }

    #[allow(clippy::cast_precision_loss)]
    fn estimate_cost(endpoint: &ModelEndpoint, analysis: &RequestAnalysis) -> f64 {
        // Assume the response roughly mirrors the prompt size
        endpoint.cost_for(analysis.estimated_tokens, analysis.estimated_tokens / 2)
    }

    /// Execute a routed request with retries across the alternatives
    ///
    /// # Errors
    ///
    /// `RoutingExhausted` carrying the last underlying cause once the
    /// retry budget and alternatives are spent.
    pub async fn execute_request(
        &self,
        request: &AiRequest,
        decision: &RoutingDecision,
    ) -> GatewayResult<RoutedResponse> {
        self.executed.fetch_add(1, Ordering::Relaxed);
        let mut chain = vec![decision.selected.clone()];
        if self.config.enable_failover {
            chain.extend(decision.alternatives.iter().cloned());
        }
        let max_attempts = chain.len().min(self.config.max_retries + 1);
        let deadline = request
            .metadata
            .max_latency_ms
            .map(Duration::from_millis);

        let provider_request = ProviderRequest {
            id: request.id.clone(),
            content: request.content.clone(),
            request_type: request.request_type.as_str().to_string(),
        };

        let mut last_error = GatewayError::BreakerOpen(
            "all candidate endpoints currently refusing traffic".to_string(),
        );
        let mut attempt = 0usize;
        for endpoint in chain.into_iter().take(max_attempts) {
            if !self.breakers.can_proceed(&endpoint.id) {
                debug!(endpoint = %endpoint.id, "Skipping endpoint with open breaker");
                continue;
            }
            if attempt > 0 {
                self.failovers.fetch_add(1, Ordering::Relaxed);
                let backoff = Duration::from_millis(
                    self.config.retry_delay_ms * attempt as u64,
                );
                tokio::time::sleep(backoff).await;
            }
            attempt += 1;

            let target = EndpointTarget {
                id: endpoint.id.clone(),
                url: endpoint.url.clone(),
                headers: endpoint.constraints.required_headers.clone(),
            };
            let started = Instant::now();
            match self.invoker.invoke(&target, &provider_request, deadline).await {
                Ok(response) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
                    let cost = endpoint.cost_for(
                        response.usage.prompt_tokens,
                        response.usage.completion_tokens,
                    );
                    self.breakers.record_success(&endpoint.id);
                    self.monitor
                        .record_request(&endpoint.id, latency_ms, true, cost)
                        .await;
                    *self.usage_counts.entry(endpoint.id.clone()).or_insert(0) += 1;
                    info!(
                        request = %request.id,
                        endpoint = %endpoint.id,
                        latency_ms = latency_ms as u64,
                        "Request served"
                    );
                    return Ok(RoutedResponse {
                        request_id: request.id.clone(),
                        model_id: endpoint.id.clone(),
                        content: response.content,
                        latency_ms,
                        cost,
                        prompt_tokens: response.usage.prompt_tokens,
                        completion_tokens: response.usage.completion_tokens,
                        from_cache: false,
                        cache_similarity: None,
                    });
                }
                Err(e) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
                    warn!(endpoint = %endpoint.id, error = %e, "Provider attempt failed");
                    self.breakers.record_failure(&endpoint.id);
                    self.monitor
                        .record_request(&endpoint.id, latency_ms, false, 0.0)
                        .await;
                    last_error = e;
                }
            }
        }

        self.exhausted.fetch_add(1, Ordering::Relaxed);
        Err(GatewayError::RoutingExhausted {
            attempts: attempt,
            last_error: Box::new(last_error),
        })
    }

    /// Full request path: semantic cache, then route and execute, then
    /// write the fresh answer back. Concurrent identical requests
    /// collapse into one provider call.
    ///
    /// # Errors
    ///
    /// `NoCandidates` or `RoutingExhausted` from the routing path.
    pub async fn process_request(&self, request: &AiRequest) -> GatewayResult<RoutedResponse> {
        let Some(cache) = &self.semantic_cache else {
            let decision = self.route(request)?;
            return self.execute_request(request, &decision).await;
        };

        let context_keys = Self::context_keys(request);
        if let Some(hit) = cache
            .get(&request.content, request.request_type, None, &context_keys)
            .await
        {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Self::response_from_hit(request, &hit));
        }

        // Single-flight per cache identity
        let (_, flight_key) =
            cache.cache_identity(&request.content, request.request_type, None, &context_keys);
        let gate = self
            .inflight
            .entry(flight_key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        if let Some(hit) = cache
            .get(&request.content, request.request_type, None, &context_keys)
            .await
        {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            self.inflight.remove(&flight_key);
            return Ok(Self::response_from_hit(request, &hit));
        }

        let result = async {
            let decision = self.route(request)?;
            let response = self.execute_request(request, &decision).await?;

            let quality = decision
                .selected
                .capability_for(request.request_type)
                .map_or(0.8, |cap| cap.quality);
            let metadata = CacheEntryMetadata {
                model: response.model_id.clone(),
                response_time_ms: response.latency_ms,
                prompt_tokens: response.prompt_tokens,
                completion_tokens: response.completion_tokens,
                cost: response.cost,
                quality,
                tags: Vec::new(),
            };
            cache
                .set(
                    &request.content,
                    request.request_type,
                    &response.content,
                    metadata,
                    &context_keys,
                )
                .await;
            Ok(response)
        }
        .await;

        drop(_guard);
        self.inflight.remove(&flight_key);
        result
    }

    fn context_keys(request: &AiRequest) -> Vec<String> {
        request
            .context
            .as_ref()
            .and_then(|c| c.session_id.as_ref())
            .map(|session| vec![format!("sess:{session}")])
            .unwrap_or_default()
    }

    fn response_from_hit(
        request: &AiRequest,
        hit: &crate::service_islands::layer5_business_logic::semantic_cache_island::SemanticHit,
    ) -> RoutedResponse {
        RoutedResponse {
            request_id: request.id.clone(),
            model_id: hit.model.clone(),
            content: hit.response.clone(),
            latency_ms: 0.0,
            cost: 0.0,
            prompt_tokens: 0,
            completion_tokens: 0,
            from_cache: true,
            cache_similarity: Some(hit.similarity),
        }
    }

    /// Per-model selection counts since start
    #[must_use]
    pub fn usage_snapshot(&self) -> serde_json::Value {
        let mut usage = serde_json::Map::new();
        for entry in self.usage_counts.iter() {
            usage.insert(entry.key().clone(), serde_json::json!(*entry.value()));
        }
        serde_json::Value::Object(usage)
    }

    /// Router statistics
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "island": "model_routing",
            "routed": self.routed.load(Ordering::Relaxed),
            "executed": self.executed.load(Ordering::Relaxed),
            "cache_hits": self.cache_hits.load(Ordering::Relaxed),
            "failovers": self.failovers.load(Ordering::Relaxed),
            "exhausted": self.exhausted.load(Ordering::Relaxed),
            "usage": self.usage_snapshot(),
            "breakers": self.breakers.statistics(),
        })
    }

    /// Health: routing needs at least one active endpoint
    pub fn health_check(&self) -> bool {
        self.registry.health_check()
    }
}
