//! Circuit Breaker Component
//!
//! Per-endpoint failure isolation. A circuit opens after a run of
//! consecutive failures, admits a probe after a quiet period, and one
//! probe outcome decides whether it closes again or re-opens.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::service_islands::layer1_infrastructure::app_config::BreakerConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Requests are blocked
    Open,
    /// A probe request is testing recovery
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Breaker bookkeeping for one endpoint
#[derive(Debug)]
struct BreakerTracker {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    total_requests: u64,
    total_failures: u64,
}

impl BreakerTracker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            total_requests: 0,
            total_failures: 0,
        }
    }

    /// Resolve the effective state, moving open circuits to half-open
    /// once the quiet period has passed.
    fn effective_state(&mut self, config: &BreakerConfig) -> CircuitState {
        if self.state == CircuitState::Open {
            let quiet = self
                .last_failure
                .is_none_or(|at| at.elapsed() >= config.open_timeout());
            if quiet {
                self.state = CircuitState::HalfOpen;
                debug!("Circuit breaker half-open, probing recovery");
            }
        }
        self.state
    }

    fn record_success(&mut self, endpoint: &str) {
        self.total_requests += 1;
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                // One successful probe closes the circuit
                self.state = CircuitState::Closed;
                self.consecutive_failures = 0;
                info!(endpoint, "✅ Circuit breaker closed, endpoint recovered");
            }
        }
    }

    fn record_failure(&mut self, endpoint: &str, config: &BreakerConfig) -> bool {
        self.total_requests += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.last_failure = Some(Instant::now());
        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= config.failure_threshold {
                    self.state = CircuitState::Open;
                    warn!(
                        endpoint,
                        failures = self.consecutive_failures,
                        "🚨 Circuit breaker opened"
                    );
                    return true;
                }
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                warn!(endpoint, "⚠️ Probe failed, circuit breaker re-opened");
                return true;
            }
            CircuitState::Open => {}
        }
        false
    }
}

/// Circuit Breaker
///
/// One independently-locked tracker per endpoint; endpoints appear
/// lazily on first use.
pub struct CircuitBreaker {
    config: BreakerConfig,
    breakers: DashMap<String, Mutex<BreakerTracker>>,
    total_blocked: AtomicU64,
    total_opened: AtomicU64,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            total_blocked: AtomicU64::new(0),
            total_opened: AtomicU64::new(0),
        }
    }

    /// Current state for an endpoint, applying the open → half-open
    /// transition when its quiet period has passed.
    #[must_use]
    pub fn state(&self, endpoint: &str) -> CircuitState {
        let entry = self
            .breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Mutex::new(BreakerTracker::new()));
        let state = entry.lock().effective_state(&self.config);
        state
    }

    /// Whether requests may proceed to the endpoint
    #[must_use]
    pub fn can_proceed(&self, endpoint: &str) -> bool {
        let allowed = self.state(endpoint) != CircuitState::Open;
        if !allowed {
            self.total_blocked.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    /// Record a successful request
    pub fn record_success(&self, endpoint: &str) {
        let entry = self
            .breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Mutex::new(BreakerTracker::new()));
        entry.lock().record_success(endpoint);
    }

    /// Record a failed request
    pub fn record_failure(&self, endpoint: &str) {
        let entry = self
            .breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Mutex::new(BreakerTracker::new()));
        let opened = entry.lock().record_failure(endpoint, &self.config);
        if opened {
            self.total_opened.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Breaker statistics across all endpoints
    #[must_use]
    pub fn statistics(&self) -> serde_json::Value {
        let mut per_endpoint = serde_json::Map::new();
        let mut open = 0usize;
        let mut half_open = 0usize;
        let mut closed = 0usize;
        for entry in self.breakers.iter() {
            let mut tracker = entry.value().lock();
            let state = tracker.effective_state(&self.config);
            match state {
                CircuitState::Open => open += 1,
                CircuitState::HalfOpen => half_open += 1,
                CircuitState::Closed => closed += 1,
            }
            per_endpoint.insert(
                entry.key().clone(),
                serde_json::json!({
                    "state": state.as_str(),
                    "consecutive_failures": tracker.consecutive_failures,
                    "total_requests": tracker.total_requests,
                    "total_failures": tracker.total_failures,
                    "last_failure_secs": tracker.last_failure.map(|t| t.elapsed().as_secs()),
                }),
            );
        }
        serde_json::json!({
            "endpoints": per_endpoint,
            "open": open,
            "half_open": half_open,
            "closed": closed,
            "total_blocked": self.total_blocked.load(Ordering::Relaxed),
            "total_opened": self.total_opened.load(Ordering::Relaxed),
        })
    }

    /// Health: the breaker map itself is always healthy; report only
    pub fn health_check(&self) -> bool {
        let open = self
            .breakers
            .iter()
            .filter(|entry| entry.value().lock().state == CircuitState::Open)
            .count();
        if open > 0 {
            warn!(open, total = self.breakers.len(), "Endpoints with open circuits");
        }
        true
    }
}
