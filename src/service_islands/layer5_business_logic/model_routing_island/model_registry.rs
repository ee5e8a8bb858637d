//! Model Registry Component
//!
//! In-memory registry of model endpoints with secondary indices by
//! request type and provider. Candidate queries filter on hard
//! requirements, then rank by a composite of reliability, quality,
//! priority and latency.

use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::{debug, info};

use super::types::{
    ModelEndpoint, ModelPerformance, ModelRequirements, RequestType,
};
use crate::service_islands::layer5_business_logic::shared::error::{
    GatewayError, GatewayResult,
};

/// Model Registry
pub struct ModelRegistry {
    endpoints: RwLock<AHashMap<String, ModelEndpoint>>,
    by_type: RwLock<AHashMap<RequestType, HashSet<String>>>,
    by_provider: RwLock<AHashMap<String, HashSet<String>>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(AHashMap::new()),
            by_type: RwLock::new(AHashMap::new()),
            by_provider: RwLock::new(AHashMap::new()),
        }
    }

    /// Register or replace an endpoint
    ///
    /// # Errors
    ///
    /// `Validation` when the descriptor is incomplete or out of range.
    pub fn register(&self, endpoint: ModelEndpoint) -> GatewayResult<()> {
        Self::validate(&endpoint)?;
        let id = endpoint.id.clone();

        {
            let mut by_type = self.by_type.write();
            for capability in &endpoint.capabilities {
                by_type
                    .entry(capability.request_type)
                    .or_default()
                    .insert(id.clone());
            }
        }
        self.by_provider
            .write()
            .entry(endpoint.provider.clone())
            .or_default()
            .insert(id.clone());
        info!(endpoint = %id, provider = %endpoint.provider, "📇 Model endpoint registered");
        self.endpoints.write().insert(id, endpoint);
        Ok(())
    }

    /// Remove an endpoint and its index entries
    pub fn unregister(&self, id: &str) -> bool {
        let Some(endpoint) = self.endpoints.write().remove(id) else {
            return false;
        };
        let mut by_type = self.by_type.write();
        for capability in &endpoint.capabilities {
            if let Some(ids) = by_type.get_mut(&capability.request_type) {
                ids.remove(id);
            }
        }
        if let Some(ids) = self.by_provider.write().get_mut(&endpoint.provider) {
            ids.remove(id);
        }
        debug!(endpoint = %id, "Model endpoint unregistered");
        true
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<ModelEndpoint> {
        self.endpoints.read().get(id).cloned()
    }

    /// All active endpoints
    #[must_use]
    pub fn list_active(&self) -> Vec<ModelEndpoint> {
        self.endpoints
            .read()
            .values()
            .filter(|e| e.active)
            .cloned()
            .collect()
    }

    /// Active endpoints claiming a request type
    #[must_use]
    pub fn list_for_request_type(&self, request_type: RequestType) -> Vec<ModelEndpoint> {
        let ids = match self.by_type.read().get(&request_type) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        let endpoints = self.endpoints.read();
        let mut matched: Vec<ModelEndpoint> = ids
            .iter()
            .filter_map(|id| endpoints.get(id))
            .filter(|e| e.active)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Replace rolling performance for an endpoint
    pub fn update_performance(&self, id: &str, performance: ModelPerformance) -> bool {
        let mut endpoints = self.endpoints.write();
        match endpoints.get_mut(id) {
            Some(endpoint) => {
                endpoint.performance = performance;
                endpoint.updated_at = chrono::Utc::now().timestamp_millis();
                true
            }
            None => false,
        }
    }

    /// Toggle an endpoint in and out of rotation
    pub fn set_active(&self, id: &str, active: bool) -> bool {
        let mut endpoints = self.endpoints.write();
        match endpoints.get_mut(id) {
            Some(endpoint) => {
                endpoint.active = active;
                endpoint.updated_at = chrono::Utc::now().timestamp_millis();
                true
            }
            None => false,
        }
    }

    /// Composite score of an endpoint for a request type:
    /// `(1−err)·0.3 + avail·0.2 + acc·0.2 + capQuality·0.2 +
    ///  priority/100·0.1 − max(0, (latency−1000)/10000)`
    #[must_use]
    pub fn score(endpoint: &ModelEndpoint, request_type: RequestType) -> f64 {
        let perf = &endpoint.performance;
        let capability_quality = endpoint
            .capability_for(request_type)
            .map_or(0.0, |cap| cap.quality);
        let latency_penalty = ((perf.avg_latency_ms - 1_000.0) / 10_000.0).max(0.0);
        (1.0 - perf.error_rate) * 0.3
            + perf.availability * 0.2
            + perf.accuracy * 0.2
            + capability_quality * 0.2
            + f64::from(endpoint.priority) / 100.0 * 0.1
            - latency_penalty
    }

    /// Candidates for a request type under hard requirements, best first
    #[must_use]
    pub fn find_best(
        &self,
        request_type: RequestType,
        requirements: &ModelRequirements,
    ) -> Vec<ModelEndpoint> {
        let mut candidates: Vec<ModelEndpoint> = self
            .list_for_request_type(request_type)
            .into_iter()
            .filter(|endpoint| {
                if requirements
                    .excluded_providers
                    .iter()
                    .any(|p| p == &endpoint.provider)
                {
                    return false;
                }
                if let Some(max_latency) = requirements.max_latency_ms {
                    if endpoint.performance.avg_latency_ms > max_latency {
                        return false;
                    }
                }
                if let Some(min_accuracy) = requirements.min_accuracy {
                    if endpoint.performance.accuracy < min_accuracy {
                        return false;
                    }
                }
                if let Some(max_cost) = requirements.max_input_cost_per_1k {
                    if endpoint.pricing.input_per_1k > max_cost {
                        return false;
                    }
                }
                requirements.required_capabilities.iter().all(|needed| {
                    endpoint.capabilities.iter().any(|cap| {
                        cap.request_type.as_str() == needed
                            || cap.specializations.iter().any(|s| s == needed)
                            || cap.languages.iter().any(|l| l == needed)
                    })
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            Self::score(b, request_type)
                .partial_cmp(&Self::score(a, request_type))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }

    /// Endpoints registered under a provider
    #[must_use]
    pub fn list_by_provider(&self, provider: &str) -> Vec<ModelEndpoint> {
        let ids = match self.by_provider.read().get(provider) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        let endpoints = self.endpoints.read();
        ids.iter().filter_map(|id| endpoints.get(id)).cloned().collect()
    }

    fn validate(endpoint: &ModelEndpoint) -> GatewayResult<()> {
        if endpoint.id.is_empty()
            || endpoint.name.is_empty()
            || endpoint.provider.is_empty()
            || endpoint.url.is_empty()
        {
            return Err(GatewayError::Validation(
                "endpoint id, name, provider and url are required".to_string(),
            ));
        }
        if endpoint.capabilities.is_empty() {
            return Err(GatewayError::Validation(format!(
                "endpoint {} declares no capabilities",
                endpoint.id
            )));
        }
        for capability in &endpoint.capabilities {
            if !(0.0..=1.0).contains(&capability.quality) {
                return Err(GatewayError::Validation(format!(
                    "capability quality {} outside [0, 1] on endpoint {}",
                    capability.quality, endpoint.id
                )));
            }
        }
        if endpoint.priority > 100 {
            return Err(GatewayError::Validation(format!(
                "priority {} outside [0, 100] on endpoint {}",
                endpoint.priority, endpoint.id
            )));
        }
        Ok(())
    }

    /// Registry statistics
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        let endpoints = self.endpoints.read();
        let active = endpoints.values().filter(|e| e.active).count();
        serde_json::json!({
            "registered": endpoints.len(),
            "active": active,
            "providers": self.by_provider.read().len(),
        })
    }

    /// Health: a registry with at least one active endpoint can route
    pub fn health_check(&self) -> bool {
        self.endpoints.read().values().any(|e| e.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_islands::layer5_business_logic::model_routing_island::types::{
        ModelCapability, ModelConstraints, ModelPricing,
    };

    fn endpoint(id: &str, priority: u8, quality: f64) -> ModelEndpoint {
        let now = chrono::Utc::now().timestamp_millis();
        ModelEndpoint {
            id: id.to_string(),
            name: format!("model {id}"),
            provider: "acme".to_string(),
            url: format!("https://models.example/{id}"),
            pricing: ModelPricing::default(),
            capabilities: vec![ModelCapability {
                request_type: RequestType::TextGeneration,
                max_tokens: 8_192,
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

    #[test]
    fn test_validation_rejects_incomplete() {
        let registry = ModelRegistry::new();
        let mut bad = endpoint("m1", 50, 0.9);
        bad.capabilities.clear();
        assert_eq!(registry.register(bad).unwrap_err().tag(), "validation");

        let mut bad = endpoint("m2", 50, 1.5);
        bad.capabilities[0].quality = 1.5;
        assert!(registry.register(bad).is_err());

        let mut bad = endpoint("", 50, 0.9);
        bad.id = String::new();
        assert!(registry.register(bad).is_err());
    }

    #[test]
    fn test_indices_follow_lifecycle() {
        let registry = ModelRegistry::new();
        registry.register(endpoint("m1", 50, 0.9)).unwrap();
        registry.register(endpoint("m2", 60, 0.8)).unwrap();
        assert_eq!(
            registry
                .list_for_request_type(RequestType::TextGeneration)
                .len(),
            2
        );
        assert_eq!(registry.list_by_provider("acme").len(), 2);

        registry.unregister("m1");
        assert_eq!(
            registry
                .list_for_request_type(RequestType::TextGeneration)
                .len(),
            1
        );
        assert!(registry.get("m1").is_none());
    }

    #[test]
    fn test_inactive_excluded_from_listing() {
        let registry = ModelRegistry::new();
        registry.register(endpoint("m1", 50, 0.9)).unwrap();
        registry.set_active("m1", false);
        assert!(registry
            .list_for_request_type(RequestType::TextGeneration)
            .is_empty());
        assert!(!registry.health_check());
    }

    #[test]
    fn test_score_prefers_reliability_and_priority() {
        let good = endpoint("good", 90, 0.9);
        let mut flaky = endpoint("flaky", 90, 0.9);
        flaky.performance.error_rate = 0.5;
        assert!(
            ModelRegistry::score(&good, RequestType::TextGeneration)
                > ModelRegistry::score(&flaky, RequestType::TextGeneration)
        );

        let humble = endpoint("humble", 10, 0.9);
        assert!(
            ModelRegistry::score(&good, RequestType::TextGeneration)
                > ModelRegistry::score(&humble, RequestType::TextGeneration)
        );
    }

    #[test]
    fn test_latency_penalty_applies_over_one_second() {
        let fast = endpoint("fast", 50, 0.9);
        let mut slow = endpoint("slow", 50, 0.9);
        slow.performance.avg_latency_ms = 6_000.0;
        let fast_score = ModelRegistry::score(&fast, RequestType::TextGeneration);
        let slow_score = ModelRegistry::score(&slow, RequestType::TextGeneration);
        assert!((fast_score - slow_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_find_best_filters_requirements() {
        let registry = ModelRegistry::new();
        let mut pricey = endpoint("pricey", 50, 0.95);
        pricey.pricing.input_per_1k = 0.5;
        registry.register(pricey).unwrap();
        registry.register(endpoint("cheap", 50, 0.8)).unwrap();

        let requirements = ModelRequirements {
            max_input_cost_per_1k: Some(0.1),
            ..ModelRequirements::default()
        };
        let best = registry.find_best(RequestType::TextGeneration, &requirements);
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].id, "cheap");
    }

    #[test]
    fn test_excluded_provider_filtered() {
        let registry = ModelRegistry::new();
        registry.register(endpoint("m1", 50, 0.9)).unwrap();
        let requirements = ModelRequirements {
            excluded_providers: vec!["acme".to_string()],
            ..ModelRequirements::default()
        };
        assert!(registry
            .find_best(RequestType::TextGeneration, &requirements)
            .is_empty());
    }
}
