//! Custom Error Types for the Gateway
//!
//! Provides strongly-typed errors instead of Box<dyn Error>.
//! The taxonomy is closed: every failure a caller can observe maps to
//! exactly one of these variants, each with a stable machine tag.

use std::fmt;

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Closed error taxonomy for gateway operations
///
/// Uses an enum instead of Box<dyn Error> to avoid heap allocation
/// and fat pointer overhead on every error path.
#[derive(Debug)]
pub enum GatewayError {
    /// A bounded wait elapsed (pool acquire, batch wait, query, provider call)
    Timeout(String),
    /// The router found no eligible endpoint for the request type
    NoCandidates(String),
    /// All routing alternatives failed; carries the last underlying cause
    RoutingExhausted {
        attempts: usize,
        last_error: Box<GatewayError>,
    },
    /// Downstream model provider returned non-2xx or a malformed payload
    Provider(String),
    /// Underlying store call failed
    Store(String),
    /// Query optimizer refused a query over the complexity budget
    ComplexityExceeded(String),
    /// Invalid configuration or endpoint registration
    Validation(String),
    /// Cache lookup missed; expected internally, never surfaced to callers
    CacheMiss,
    /// Circuit breaker is open; internal signal that triggers alternative selection
    BreakerOpen(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(msg) => write!(f, "Timeout: {msg}"),
            Self::NoCandidates(msg) => write!(f, "No candidate endpoints: {msg}"),
            Self::RoutingExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "Routing exhausted after {attempts} attempts: {last_error}"
            ),
            Self::Provider(msg) => write!(f, "Provider error: {msg}"),
            Self::Store(msg) => write!(f, "Store error: {msg}"),
            Self::ComplexityExceeded(msg) => write!(f, "Complexity exceeded: {msg}"),
            Self::Validation(msg) => write!(f, "Validation error: {msg}"),
            Self::CacheMiss => write!(f, "Cache miss"),
            Self::BreakerOpen(msg) => write!(f, "Circuit breaker open: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RoutingExhausted { last_error, .. } => Some(last_error.as_ref()),
            _ => None,
        }
    }
}

// Conversion implementations for common error types

impl From<tokio::time::error::Elapsed> for GatewayError {
    #[inline]
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout("Operation timed out".to_string())
    }
}

impl From<redis::RedisError> for GatewayError {
    #[inline]
    fn from(e: redis::RedisError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    #[inline]
    fn from(e: serde_json::Error) -> Self {
        Self::Store(format!("Document encoding failed: {e}"))
    }
}

impl GatewayError {
    /// Stable machine tag for the variant, suitable for logs and metrics
    #[inline]
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::NoCandidates(_) => "no_candidates",
            Self::RoutingExhausted { .. } => "routing_exhausted",
            Self::Provider(_) => "provider_error",
            Self::Store(_) => "store_error",
            Self::ComplexityExceeded(_) => "complexity_exceeded",
            Self::Validation(_) => "validation",
            Self::CacheMiss => "cache_miss",
            Self::BreakerOpen(_) => "breaker_open",
        }
    }

    /// Check if error is a timeout
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if error is a cache miss
    #[inline]
    #[must_use]
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Self::CacheMiss)
    }

    /// Convert to boxed error for backward compatibility with legacy APIs
    #[inline]
    #[must_use]
    pub fn into_boxed(self) -> Box<dyn std::error::Error + Send + Sync> {
        Box::new(self)
    }
}
