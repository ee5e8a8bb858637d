//! Layer 5: Business Logic
//!
//! The intelligence of the gateway: semantic response caching, request
//! analysis, model registry and routing, and cross-modal matching.

pub mod cross_modal_island;
pub mod model_routing_island;
pub mod semantic_cache_island;
pub mod shared;

// Re-export the main island components for easy access
pub use cross_modal_island::{CrossModalMatch, CrossModalMatcher, MatchContext, RelationshipKind};
pub use model_routing_island::model_registry::ModelRegistry;
pub use model_routing_island::request_analyzer::RequestAnalyzer;
pub use model_routing_island::RoutingEngine;
pub use semantic_cache_island::{CacheEntryMetadata, SemanticCache, SemanticHit};
pub use shared::error::{GatewayError, GatewayResult};
